//! Subprocess handler loader.
//!
//! The handler module is an executable relative to the service directory.
//! Each invocation spawns it with the entry name as its only argument, the
//! layered environment (and nothing else) as its environment, and the event
//! JSON on stdin. Stdout is the result: JSON if it parses, else a string.
//! A non-zero exit is a failure carrying the tail of stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::HandlerError;
use crate::invoke::{Callback, InvocationContext};
use crate::traits::{Handler, HandlerLoader, HandlerReturn};
use crate::types::HandlerRef;

/// Loads handlers as executables found under one or more search roots.
#[derive(Debug, Clone)]
pub struct ProcessHandlerLoader {
    roots: Vec<PathBuf>,
}

impl ProcessHandlerLoader {
    pub fn new(service_dir: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![service_dir.into()],
        }
    }

    /// Search `dir` before the existing roots. Used for bundler output
    /// directories that shadow the sources.
    pub fn prefer(mut self, dir: impl Into<PathBuf>) -> Self {
        self.roots.insert(0, dir.into());
        self
    }

    async fn locate(&self, module: &str) -> Option<PathBuf> {
        for root in &self.roots {
            let candidate = root.join(module);
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
        None
    }
}

#[async_trait]
impl HandlerLoader for ProcessHandlerLoader {
    async fn load(&self, reference: &HandlerRef) -> Result<Arc<dyn Handler>, HandlerError> {
        let program = self.locate(&reference.module).await.ok_or_else(|| {
            HandlerError::new(format!("handler module '{}' not found", reference.module))
                .with_type("HandlerNotFound")
        })?;
        Ok(Arc::new(ProcessHandler {
            program,
            entry: reference.entry.clone(),
        }))
    }
}

struct ProcessHandler {
    program: PathBuf,
    entry: String,
}

impl Handler for ProcessHandler {
    fn call(
        &self,
        event: Value,
        context: InvocationContext,
        _callback: Callback,
    ) -> Result<HandlerReturn, HandlerError> {
        let input = serde_json::to_vec(&event)
            .map_err(|e| HandlerError::new(format!("failed to encode event: {e}")))?;
        let program = self.program.clone();
        let entry = self.entry.clone();
        Ok(HandlerReturn::deferred(async move {
            run_process(&program, &entry, &context, input).await
        }))
    }
}

async fn run_process(
    program: &Path,
    entry: &str,
    context: &InvocationContext,
    input: Vec<u8>,
) -> Result<Value, HandlerError> {
    let mut command = Command::new(program);
    command
        .arg(entry)
        .env_clear()
        .envs(context.environment())
        .env("AWS_LAMBDA_FUNCTION_NAME", context.function_name())
        .env("LOCALDEV_REQUEST_ID", context.request_id())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = program.parent() {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .map_err(|e| HandlerError::new(format!("failed to start {}: {e}", program.display())))?;

    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            // The child may exit without reading its input.
            let _ = stdin.write_all(&input).await;
        });
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| HandlerError::new(format!("failed to wait for handler: {e}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        tracing::info!(function = %context.function_name(), "{line}");
    }

    if !output.status.success() {
        let message = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("handler exited with {}", output.status));
        return Err(HandlerError::new(message).with_type("ProcessExit"));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
}
