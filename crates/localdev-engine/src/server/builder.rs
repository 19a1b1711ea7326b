//! Server builder: assembles function records, loaders and backends.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::FixedOffset;

use super::LocalDevServer;
use crate::config::{ServerOptions, ServiceConfig, WEBPACK_PLUGIN};
use crate::errors::{ConfigError, ServerError};
use crate::handlers::{ChainedLoader, HandlerRegistry, ProcessHandlerLoader};
use crate::invoke::{EnvironmentLayers, InvocationAdapter};
use crate::queue::InMemoryQueue;
use crate::traits::{HandlerLoader, QueueClient};
use crate::triggers::{compile, is_enabled, CompileOptions};
use crate::types::{FunctionRecord, HandlerRef, TriggerKind};

/// Builder for [`LocalDevServer`].
///
/// Everything except the service definition is optional. Defaults applied
/// in [`build()`](LocalDevServerBuilder::build): options from the service
/// file, handlers as executables under the service directory, an
/// [`InMemoryQueue`] backend, the host's UTC offset and the current process
/// environment as baseline. Queue polling needs a backend set through
/// [`queue_client`](LocalDevServerBuilder::queue_client): nothing feeds the
/// default in-memory queues.
pub struct LocalDevServerBuilder {
    service: ServiceConfig,
    service_dir: PathBuf,
    options: Option<ServerOptions>,
    registry: Option<HandlerRegistry>,
    handler_loader: Option<Arc<dyn HandlerLoader>>,
    queue_client: Option<Arc<dyn QueueClient>>,
    utc_offset: Option<FixedOffset>,
    baseline_environment: Option<BTreeMap<String, String>>,
}

impl LocalDevServerBuilder {
    pub(super) fn new() -> Self {
        Self {
            service: ServiceConfig::default(),
            service_dir: PathBuf::from("."),
            options: None,
            registry: None,
            handler_loader: None,
            queue_client: None,
            utc_offset: None,
            baseline_environment: None,
        }
    }

    pub fn service(mut self, config: ServiceConfig) -> Self {
        self.service = config;
        self
    }

    /// Directory handlers, override files and the static folder resolve against.
    pub fn service_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.service_dir = dir.into();
        self
    }

    /// Replace the options derived from the service file.
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// In-process handlers, consulted before executables.
    pub fn handlers(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace handler loading entirely.
    pub fn handler_loader(mut self, loader: impl HandlerLoader + 'static) -> Self {
        self.handler_loader = Some(Arc::new(loader));
        self
    }

    /// Set the queue backend. Default: [`InMemoryQueue`].
    pub fn queue_client(mut self, client: impl QueueClient + 'static) -> Self {
        self.queue_client = Some(Arc::new(client));
        self
    }

    /// Offset used to render cron routes in local time. Default: the host's.
    pub fn utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    /// Baseline environment handlers see. Default: the process environment.
    pub fn baseline_environment(mut self, env: BTreeMap<String, String>) -> Self {
        self.baseline_environment = Some(env);
        self
    }

    /// Compile every function and wire the runtime.
    ///
    /// Fails on malformed trigger config, unparseable handler references and
    /// queue polling without an explicit queue backend. Functions without any
    /// supported trigger are left out.
    pub fn build(self) -> Result<LocalDevServer, ServerError> {
        let options = self
            .options
            .unwrap_or_else(|| ServerOptions::from_service(&self.service, &self.service_dir));

        let compile_options = CompileOptions {
            base_path: self.service.base_path(),
            show_local_time: options.show_local_time,
            utc_offset: self.utc_offset.unwrap_or_else(CompileOptions::host_offset),
        };

        let provider_env = self.service.provider_environment();
        let mut records = Vec::new();
        for (name, function) in &self.service.functions {
            let triggers = compile(name, &function.events, &compile_options).map_err(|source| {
                ConfigError::Trigger {
                    function: name.clone(),
                    source,
                }
            })?;
            if triggers.is_empty() {
                tracing::debug!(function = %name, "no supported triggers, skipping function");
                continue;
            }

            let reference = function.handler.as_deref().unwrap_or_default();
            let handler = HandlerRef::parse(reference).ok_or_else(|| ConfigError::Function {
                function: name.clone(),
                message: format!("invalid handler reference '{reference}', expected module.entry"),
            })?;

            let mut environment = provider_env.clone();
            environment.extend(function.declared_environment());
            environment.extend(options.environment.clone());

            records.push(Arc::new(FunctionRecord {
                name: name.clone(),
                handler,
                environment,
                triggers,
            }));
        }

        if options.poll_queues && self.queue_client.is_none() {
            let polled: Vec<&str> = records
                .iter()
                .filter(|record| {
                    record
                        .triggers
                        .iter()
                        .any(|t| t.kind == TriggerKind::Sqs && is_enabled(t))
                })
                .map(|record| record.name.as_str())
                .collect();
            if !polled.is_empty() {
                return Err(ConfigError::NoQueueBackend {
                    functions: polled.join(", "),
                }
                .into());
            }
        }

        let loader = match self.handler_loader {
            Some(loader) => loader,
            None => {
                let mut process = ProcessHandlerLoader::new(&self.service_dir);
                if self.service.has_plugin(WEBPACK_PLUGIN) {
                    process = process.prefer(self.service_dir.join(".webpack").join("service"));
                }
                let mut loaders: Vec<Arc<dyn HandlerLoader>> = Vec::new();
                if let Some(registry) = self.registry {
                    loaders.push(Arc::new(registry));
                }
                loaders.push(Arc::new(process));
                Arc::new(ChainedLoader::new(loaders))
            }
        };

        let override_dir = Some(self.service_dir.clone());
        let environment = match self.baseline_environment {
            Some(baseline) => EnvironmentLayers::with_baseline(baseline, override_dir),
            None => EnvironmentLayers::capture(override_dir),
        };

        Ok(LocalDevServer {
            records,
            adapter: Arc::new(InvocationAdapter::new(loader, environment)),
            queue_client: self
                .queue_client
                .unwrap_or_else(|| Arc::new(InMemoryQueue::new())),
            options,
        })
    }
}
