//! Core data types shared by the compiler, dispatcher, invocation adapter
//! and queue consumer.
//!
//! Map fields use `BTreeMap` so synthesized payloads and route listings are
//! deterministic across runs.

pub mod descriptor;
pub mod function;
pub mod stimulus;

pub use descriptor::*;
pub use function::*;
pub use stimulus::*;

use serde_json::Value;

use crate::errors::HandlerError;

// ---------------------------------------------------------------------------
// Invocation outcome
// ---------------------------------------------------------------------------

/// The settled result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success(Value),
    Failure(HandlerError),
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<Result<Value, HandlerError>> for InvocationOutcome {
    fn from(result: Result<Value, HandlerError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}
