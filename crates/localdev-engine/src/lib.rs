//! localdev: a local emulator for event-triggered functions.
//!
//! A service definition declares functions and the triggers that invoke
//! them: HTTP routes, schedules, S3 notifications, CloudWatch log
//! subscriptions and SQS queues. This crate compiles those triggers into
//! routes, serves them over HTTP so each one can be poked by hand, and
//! optionally runs schedule tickers and queue consumer loops in the
//! background.
//!
//! Handlers are resolved through a [`HandlerLoader`]: in-process Rust
//! handlers from a [`HandlerRegistry`], or executables under the service
//! directory via [`ProcessHandlerLoader`].

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod handlers;
pub mod invoke;
pub mod queue;
pub mod server;
pub mod traits;
pub mod triggers;
pub mod types;

// Re-export public types at the crate level.

// config
pub use config::{ServerOptions, ServiceConfig};

// dispatch
pub use dispatch::{BoundRoute, Dispatcher};

// errors
pub use errors::{
    ConfigError, HandlerError, QueueError, ServerError, TranslationError, TriggerError,
};

// handlers
pub use handlers::{ChainedLoader, HandlerRegistry, ProcessHandlerLoader};

// invoke
pub use invoke::{Callback, EnvironmentLayers, InvocationAdapter, InvocationContext};

// queue
#[cfg(feature = "sqs")]
pub use queue::SqsQueueClient;
pub use queue::{ConsumerConfig, InMemoryQueue, QueueConsumer};

// server
pub use server::{LocalDevServer, LocalDevServerBuilder};

// traits
pub use traits::{AsyncHandler, Handler, HandlerLoader, HandlerReturn, QueueClient};

// triggers
pub use triggers::{compile, synthesize, CompileOptions, RunningFlag, TriggerRunner};

// types
pub use types::{
    FunctionRecord, HandlerRef, HttpStimulus, InvocationOutcome, MessageBatch, QueueHandle,
    ReceivedMessage, ResponseMode, Stimulus, TriggerDescriptor, TriggerKind,
};
