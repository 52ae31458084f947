//! # framecall-client
//!
//! Caller runtime for framecall.
//!
//! This crate provides:
//! - The `invoke` entry point for calling remote methods
//! - Persistent-connection caching with idle eviction
//! - Request/reply correlation checking
//! - A single transparent retry after a cached-connection failure

pub mod cache;
pub mod caller;
pub mod connection;
pub mod error;

pub use cache::ConnectionCache;
pub use caller::{Caller, CallerConfig};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
