//! # framecall-server
//!
//! Callee runtime for framecall.
//!
//! This crate provides:
//! - A method registry keyed by (service, method)
//! - A TCP accept loop serving registered methods
//! - Per-connection keep-alive negotiation and dispatch
//! - In-band ERROR replies for unregistered targets, handler errors,
//!   and handler panics

pub mod connection;
pub mod error;
pub mod registry;
pub mod server;

pub use connection::{ConnState, ConnectionDriver};
pub use error::ServerError;
pub use registry::{Method, MethodError, MethodRegistry};
pub use server::{Server, ServerConfig, ServerStats, ServerStatus};
