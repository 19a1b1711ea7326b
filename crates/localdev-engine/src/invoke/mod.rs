//! Invocation adapter.
//!
//! Runs one handler call and folds its three completion styles (context,
//! callback, returned future) into a single [`InvocationOutcome`]. The
//! first completion wins; a handler that drops every handle without
//! completing settles as a failure.

mod environment;
mod settlement;

pub use environment::{EnvironmentLayers, OVERRIDE_FILES};
pub use settlement::{Callback, InvocationContext};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use self::settlement::SettlementCell;
use crate::errors::HandlerError;
use crate::traits::{HandlerLoader, HandlerReturn};
use crate::types::{FunctionRecord, InvocationOutcome};

pub const UNSETTLED_MESSAGE: &str = "handler finished without settling";

pub struct InvocationAdapter {
    loader: Arc<dyn HandlerLoader>,
    environment: EnvironmentLayers,
}

impl InvocationAdapter {
    pub fn new(loader: Arc<dyn HandlerLoader>, environment: EnvironmentLayers) -> Self {
        Self {
            loader,
            environment,
        }
    }

    /// Load the function's handler and run it against `payload`.
    ///
    /// Never returns early on handler misbehaviour: load errors, synchronous
    /// errors and panics all become [`InvocationOutcome::Failure`].
    pub async fn invoke(&self, record: &FunctionRecord, payload: Value) -> InvocationOutcome {
        let environment = Arc::new(self.environment.resolve(&record.environment));

        let handler = match self.loader.load(&record.handler).await {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!(function = %record.name, handler = %record.handler, "failed to load handler: {e}");
                return InvocationOutcome::Failure(e);
            }
        };

        let (cell, settled) = SettlementCell::new();
        let context = InvocationContext::new(&record.name, environment, Arc::clone(&cell));
        let callback = context.callback();
        tracing::debug!(function = %record.name, request_id = %context.request_id(), "invoking handler");

        let returned =
            std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(payload, context, callback)));

        match returned {
            Err(panic) => {
                cell.settle(InvocationOutcome::Failure(panicked(panic.as_ref())));
            }
            Ok(Err(e)) => {
                cell.settle(InvocationOutcome::Failure(e));
            }
            Ok(Ok(HandlerReturn::Pending)) => {}
            Ok(Ok(HandlerReturn::Deferred(future))) => {
                let cell = Arc::clone(&cell);
                tokio::spawn(async move {
                    let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(result) => result.into(),
                        Err(panic) => InvocationOutcome::Failure(panicked(panic.as_ref())),
                    };
                    cell.settle(outcome);
                });
            }
        }
        drop(cell);

        settled
            .await
            .unwrap_or_else(|_| InvocationOutcome::Failure(HandlerError::new(UNSETTLED_MESSAGE)))
    }
}

fn panicked(panic: &(dyn Any + Send)) -> HandlerError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    HandlerError::new(message).with_type("Panic")
}
