//! Method registry: (service name, method name) -> handler.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// An application-defined handler failure.
///
/// The message is carried back to the caller in an `ERROR` envelope.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MethodError(String);

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// An invocable method handler.
///
/// One fixed signature: structured arguments in, structured result or
/// an application error out. Implemented automatically for matching
/// closures.
pub trait Method: Send + Sync {
    fn call(&self, args: Value) -> Result<Value, MethodError>;
}

impl<F> Method for F
where
    F: Fn(Value) -> Result<Value, MethodError> + Send + Sync,
{
    fn call(&self, args: Value) -> Result<Value, MethodError> {
        self(args)
    }
}

/// Dispatch table mapping (service, method) pairs to handlers.
///
/// Registration is append/replace-only and safe to call concurrently
/// with dispatch.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<(String, String), Arc<dyn Method>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, overwriting any existing registration for
    /// the same (service, method) pair.
    pub fn register(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        handler: impl Method + 'static,
    ) {
        let service = service.into();
        let method = method.into();
        tracing::debug!(%service, %method, "registering method");
        self.methods
            .write()
            .insert((service, method), Arc::new(handler));
    }

    /// Looks up the handler for an exact (service, method) match.
    ///
    /// A missing service and a missing method are indistinguishable:
    /// both return `None` and are reported to the caller as the same
    /// "not registered" error.
    pub fn lookup(&self, service: &str, method: &str) -> Option<Arc<dyn Method>> {
        self.methods
            .read()
            .get(&(service.to_string(), method.to_string()))
            .cloned()
    }

    /// Returns all registered (service, method) pairs, sorted.
    pub fn registrations(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self.methods.read().keys().cloned().collect();
        pairs.sort();
        pairs
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}
