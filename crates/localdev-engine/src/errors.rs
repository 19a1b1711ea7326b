//! Error types for trigger compilation, invocation, translation and queues.

use thiserror::Error;

/// Errors from compiling or running a trigger.
///
/// `Config` is fatal at startup: it is surfaced before any listener binds.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger config error: {message}")]
    Config { message: String },
    #[error("trigger runtime error: {message}")]
    Runtime { message: String },
}

impl TriggerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Errors from loading a service definition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read service file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid YAML in service file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON in service file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("function {function}: {message}")]
    Function { function: String, message: String },
    #[error("function {function}: {source}")]
    Trigger {
        function: String,
        source: TriggerError,
    },
    #[error("queue polling is enabled for {functions} but no queue backend is configured; build with the `sqs` feature or disable polling")]
    NoQueueBackend { functions: String },
}

/// The error half of an invocation outcome.
///
/// Produced when a handler fails explicitly, returns an error, panics,
/// cannot be loaded, or drops every completion handle without settling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub error_type: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// An outcome value that does not fit the trigger's response mode.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TranslationError {
    #[error("handler result must be an object with statusCode/headers/body")]
    NotAnObject,
    #[error("invalid status code: {value}")]
    InvalidStatus { value: String },
    #[error("invalid response header {name}")]
    InvalidHeader { name: String },
    #[error("the body is not a base64 encoded string")]
    EncodedBodyNotString,
    #[error("failed to decode base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Errors from a [`QueueClient`](super::traits::QueueClient) backend.
///
/// All of these are treated as transient by the consumer loop.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue not found: {queue}")]
    NotFound { queue: String },
    #[error("queue error: {message}")]
    Queue { message: String },
}

/// Errors from assembling or serving a [`LocalDevServer`](crate::server::LocalDevServer).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no functions with compatible triggers found")]
    NoFunctions,
}
