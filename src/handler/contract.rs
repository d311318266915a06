//! The invocation contract between the server and user handler code.

use crate::invocation::{InvocationContext, InvocationEvent, InvocationResult};
use async_trait::async_trait;
use std::future::Future;

/// A user-supplied function implementing the invocation contract.
///
/// Handlers receive the event built from the request and an (empty)
/// context, and return an [`InvocationResult`] whose `body` is mandatory.
/// Implement the trait directly for stateful handlers, or wrap an async
/// function or closure with [`handler_fn`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run one invocation.
    async fn invoke(
        &self,
        event: InvocationEvent,
        context: InvocationContext,
    ) -> Result<InvocationResult, HandlerError>;
}

/// Adapt an async function or closure into a [`Handler`], in the style of
/// hyper's `service_fn`.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(InvocationEvent, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<InvocationResult, HandlerError>> + Send,
{
    HandlerFn { f }
}

/// [`Handler`] returned by [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(InvocationEvent, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<InvocationResult, HandlerError>> + Send,
{
    async fn invoke(
        &self,
        event: InvocationEvent,
        context: InvocationContext,
    ) -> Result<InvocationResult, HandlerError> {
        (self.f)(event, context).await
    }
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<handler>")
    }
}

/// Error raised by (or on behalf of) a handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerError {
    /// Error message.
    pub message: String,
}

impl HandlerError {
    /// Create a new HandlerError.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::new(err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}
