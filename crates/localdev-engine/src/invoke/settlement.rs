//! First-write-wins completion for a single invocation.
//!
//! Every completion handle a handler receives (context, callback, returned
//! future) shares one [`SettlementCell`]. The first settle takes the sender;
//! later settles find it gone and are dropped with a debug log.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::HandlerError;
use crate::types::InvocationOutcome;

pub(crate) struct SettlementCell {
    tx: Mutex<Option<oneshot::Sender<InvocationOutcome>>>,
}

impl SettlementCell {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<InvocationOutcome>) {
        let (tx, rx) = oneshot::channel();
        let cell = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (cell, rx)
    }

    /// Returns `true` if this call settled the invocation.
    pub(crate) fn settle(&self, outcome: InvocationOutcome) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            tracing::debug!("invocation already settled, ignoring late completion");
            return false;
        };
        // The receiver only goes away if the invoking task was cancelled.
        let _ = tx.send(outcome);
        true
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

// ---------------------------------------------------------------------------
// InvocationContext
// ---------------------------------------------------------------------------

/// Per-invocation context handed to every handler.
///
/// Cloning is cheap; all clones settle the same invocation.
#[derive(Clone)]
pub struct InvocationContext {
    function_name: Arc<str>,
    request_id: Arc<str>,
    environment: Arc<BTreeMap<String, String>>,
    cell: Arc<SettlementCell>,
}

impl InvocationContext {
    pub(crate) fn new(
        function_name: &str,
        environment: Arc<BTreeMap<String, String>>,
        cell: Arc<SettlementCell>,
    ) -> Self {
        Self {
            function_name: Arc::from(function_name),
            request_id: Arc::from(uuid::Uuid::new_v4().to_string()),
            environment,
            cell,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The fully layered environment for this invocation.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }

    pub fn succeed(&self, value: Value) -> bool {
        self.cell.settle(InvocationOutcome::Success(value))
    }

    pub fn fail(&self, error: impl Into<HandlerError>) -> bool {
        self.cell.settle(InvocationOutcome::Failure(error.into()))
    }

    pub fn is_settled(&self) -> bool {
        self.cell.is_settled()
    }

    /// A standalone callback settling this invocation.
    pub fn callback(&self) -> Callback {
        Callback {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("function_name", &self.function_name)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// Error-first completion callback.
#[derive(Clone)]
pub struct Callback {
    cell: Arc<SettlementCell>,
}

impl Callback {
    /// Settle with `error` if present, else with `result` (null when absent).
    pub fn call(&self, error: Option<HandlerError>, result: Option<Value>) -> bool {
        let outcome = match error {
            Some(error) => InvocationOutcome::Failure(error),
            None => InvocationOutcome::Success(result.unwrap_or(Value::Null)),
        };
        self.cell.settle(outcome)
    }

    pub fn done(&self, result: Result<Value, HandlerError>) -> bool {
        self.cell.settle(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> (InvocationContext, oneshot::Receiver<InvocationOutcome>) {
        let (cell, rx) = SettlementCell::new();
        let ctx = InvocationContext::new("fn", Arc::new(BTreeMap::new()), cell);
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_first_settle_wins() {
        let (ctx, rx) = context();
        let callback = ctx.callback();

        assert!(ctx.succeed(json!("first")));
        assert!(!callback.call(Some(HandlerError::new("late")), None));
        assert!(!ctx.fail("later"));
        assert!(ctx.is_settled());

        let outcome = rx.await.expect("settled");
        assert_eq!(outcome, InvocationOutcome::Success(json!("first")));
    }

    #[tokio::test]
    async fn test_callback_error_first() {
        let (ctx, rx) = context();
        ctx.callback().call(Some(HandlerError::new("boom")), Some(json!(1)));
        assert_eq!(
            rx.await.expect("settled"),
            InvocationOutcome::Failure(HandlerError::new("boom"))
        );
    }

    #[tokio::test]
    async fn test_callback_without_result_is_null_success() {
        let (ctx, rx) = context();
        ctx.callback().call(None, None);
        assert_eq!(rx.await.expect("settled"), InvocationOutcome::Success(Value::Null));
    }

    #[tokio::test]
    async fn test_dropping_all_handles_closes_receiver() {
        let (ctx, rx) = context();
        drop(ctx);
        assert!(rx.await.is_err());
    }
}
