//! Plugin trait interfaces.
//!
//! Handlers, handler loaders and queue backends are the three seams the
//! emulator is wired through. Defaults live in [`handlers`](crate::handlers)
//! and [`queue`](crate::queue).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::errors::*;
use super::invoke::{Callback, InvocationContext};
use super::types::*;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// What a handler hands back synchronously.
pub enum HandlerReturn {
    /// The handler will complete through its context or callback.
    Pending,
    /// The handler completes when this future resolves.
    Deferred(BoxFuture<'static, Result<Value, HandlerError>>),
}

impl HandlerReturn {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }
}

/// A user function.
///
/// A handler may complete in any of three ways: call
/// [`InvocationContext::succeed`]/[`InvocationContext::fail`], call the
/// [`Callback`], or return [`HandlerReturn::Deferred`]. The first one to
/// fire settles the invocation; the rest are ignored. Returning `Err`
/// synchronously (or panicking) settles as a failure.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        event: Value,
        context: InvocationContext,
        callback: Callback,
    ) -> Result<HandlerReturn, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Value, InvocationContext, Callback) -> Result<HandlerReturn, HandlerError> + Send + Sync,
{
    fn call(
        &self,
        event: Value,
        context: InvocationContext,
        callback: Callback,
    ) -> Result<HandlerReturn, HandlerError> {
        self(event, context, callback)
    }
}

/// Adapts an `async fn(event, context) -> Result<Value, HandlerError>`
/// into a [`Handler`] that completes through its returned future.
pub struct AsyncHandler<F>(pub F);

impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn call(
        &self,
        event: Value,
        context: InvocationContext,
        _callback: Callback,
    ) -> Result<HandlerReturn, HandlerError> {
        Ok(HandlerReturn::deferred((self.0)(event, context)))
    }
}

// ---------------------------------------------------------------------------
// HandlerLoader
// ---------------------------------------------------------------------------

/// Resolves a [`HandlerRef`] to a callable handler.
///
/// Called once per invocation so loaders that read from disk pick up edits
/// without a restart.
#[async_trait]
pub trait HandlerLoader: Send + Sync {
    async fn load(&self, reference: &HandlerRef) -> Result<Arc<dyn Handler>, HandlerError>;
}

// ---------------------------------------------------------------------------
// QueueClient
// ---------------------------------------------------------------------------

/// A message queue backend with SQS-style receive and delete semantics.
///
/// Received messages stay invisible until acknowledged or until the
/// backend's visibility timeout lapses, after which they are redelivered.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Resolve a queue name, URL or ARN to a handle.
    async fn resolve_queue_handle(&self, identity: &str) -> Result<QueueHandle, QueueError>;

    /// Receive up to `max_messages`, waiting up to `wait` for at least one.
    ///
    /// An empty result is not an error.
    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete the messages identified by `receipt_handles`.
    async fn acknowledge(
        &self,
        queue: &QueueHandle,
        receipt_handles: &[String],
    ) -> Result<(), QueueError>;
}
