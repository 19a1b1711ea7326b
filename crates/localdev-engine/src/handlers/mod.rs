//! Built-in handler loaders.
//!
//! - [`HandlerRegistry`]: handlers registered in-process, keyed by `module.entry`.
//! - [`ProcessHandlerLoader`]: runs an executable from the service directory.
//! - [`ChainedLoader`]: tries loaders in order.

mod process;

pub use process::ProcessHandlerLoader;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::HandlerError;
use crate::invoke::{Callback, InvocationContext};
use crate::traits::{Handler, HandlerLoader, HandlerReturn};
use crate::types::HandlerRef;

fn not_found(reference: &HandlerRef) -> HandlerError {
    HandlerError::new(format!("handler '{reference}' not found")).with_type("HandlerNotFound")
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// In-process handlers keyed by their `module.entry` reference.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, reference: &str, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(reference.to_string(), Arc::new(handler));
        self
    }

    /// Register a closure using the context/callback calling convention.
    pub fn register_fn<F>(self, reference: &str, handler: F) -> Self
    where
        F: Fn(Value, InvocationContext, Callback) -> Result<HandlerReturn, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.register(reference, handler)
    }

    pub fn contains(&self, reference: &HandlerRef) -> bool {
        self.handlers.contains_key(&reference.to_string())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl HandlerLoader for HandlerRegistry {
    async fn load(&self, reference: &HandlerRef) -> Result<Arc<dyn Handler>, HandlerError> {
        self.handlers
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| not_found(reference))
    }
}

// ---------------------------------------------------------------------------
// ChainedLoader
// ---------------------------------------------------------------------------

/// Tries each loader in turn; the first successful load wins.
pub struct ChainedLoader {
    loaders: Vec<Arc<dyn HandlerLoader>>,
}

impl ChainedLoader {
    pub fn new(loaders: Vec<Arc<dyn HandlerLoader>>) -> Self {
        Self { loaders }
    }
}

#[async_trait]
impl HandlerLoader for ChainedLoader {
    async fn load(&self, reference: &HandlerRef) -> Result<Arc<dyn Handler>, HandlerError> {
        let mut last_error = None;
        for loader in &self.loaders {
            match loader.load(reference).await {
                Ok(handler) => return Ok(handler),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| not_found(reference)))
    }
}
