//! The local development server.
//!
//! [`LocalDevServer`] owns the compiled function records and turns them
//! into an axum router (HTTP dispatch for every trigger kind) plus a
//! [`TriggerRunner`] (schedule tickers and queue consumers). Construct via
//! [`LocalDevServer::builder()`].
//!
//! ```rust,ignore
//! let config = ServiceConfig::load(Path::new("serverless.yml"))?;
//! let server = LocalDevServer::builder()
//!     .service(config)
//!     .service_dir(".")
//!     .build()?;
//!
//! let listener = TcpListener::bind(("0.0.0.0", server.options().port)).await?;
//! server.serve(listener, shutdown_signal()).await?;
//! ```

mod builder;

pub use builder::LocalDevServerBuilder;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServerOptions;
use crate::dispatch::Dispatcher;
use crate::errors::ServerError;
use crate::invoke::InvocationAdapter;
use crate::queue::QueueConsumer;
use crate::traits::QueueClient;
use crate::triggers::{is_enabled, Cadence, RunningFlag, ScheduleTicker, TriggerRunner};
use crate::types::{FunctionRecord, TriggerKind};

pub struct LocalDevServer {
    records: Vec<Arc<FunctionRecord>>,
    adapter: Arc<InvocationAdapter>,
    queue_client: Arc<dyn QueueClient>,
    options: ServerOptions,
}

impl LocalDevServer {
    pub fn builder() -> LocalDevServerBuilder {
        LocalDevServerBuilder::new()
    }

    /// Functions with at least one supported trigger.
    pub fn records(&self) -> &[Arc<FunctionRecord>] {
        &self.records
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Bind every trigger route.
    pub fn dispatcher(&self) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(Arc::clone(&self.adapter), self.options.cors);
        for record in &self.records {
            for descriptor in &record.triggers {
                dispatcher.attach(record, descriptor);
            }
        }
        dispatcher
    }

    /// The complete HTTP surface: trigger routes, the static folder and
    /// request tracing.
    pub fn router(&self) -> Router {
        self.finish_router(self.dispatcher())
    }

    fn finish_router(&self, dispatcher: Dispatcher) -> Router {
        let mut router = dispatcher.into_router();
        if let Some(folder) = &self.options.static_folder {
            router = router.nest_service("/static", ServeDir::new(folder));
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Schedule tickers (when auto-fire is on) and queue consumers (when
    /// polling is on) for every enabled trigger.
    pub fn trigger_runner(&self) -> TriggerRunner {
        let mut tickers = Vec::new();
        let mut consumers = Vec::new();

        for record in &self.records {
            for descriptor in record.triggers.iter().filter(|d| is_enabled(d)) {
                match descriptor.kind {
                    TriggerKind::Schedule if self.options.auto_fire_schedules => {
                        let expression = descriptor.identity.as_deref().unwrap_or_default();
                        if let Err(e) = Cadence::parse(expression) {
                            tracing::warn!(
                                function = %record.name,
                                schedule = %expression,
                                error = %e,
                                "cannot auto-fire schedule, route still available"
                            );
                            continue;
                        }
                        tickers.push(ScheduleTicker::new(
                            Arc::clone(record),
                            descriptor.clone(),
                            Arc::clone(&self.adapter),
                        ));
                    }
                    TriggerKind::Sqs if self.options.poll_queues => {
                        consumers.push(QueueConsumer::new(
                            Arc::clone(record),
                            descriptor.clone(),
                            Arc::clone(&self.queue_client),
                            Arc::clone(&self.adapter),
                            self.options.consumer.clone(),
                        ));
                    }
                    _ => {}
                }
            }
        }

        TriggerRunner::new(tickers, consumers, RunningFlag::new())
    }

    /// Serve on `listener` until `shutdown` resolves, then stop the
    /// background triggers.
    ///
    /// Returns [`ServerError::NoFunctions`] without binding anything when
    /// no function has a supported trigger.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.records.is_empty() {
            tracing::warn!("no functions with compatible triggers found");
            return Err(ServerError::NoFunctions);
        }

        let port = listener.local_addr()?.port();
        let dispatcher = self.dispatcher();
        for route in dispatcher.routes() {
            tracing::info!(
                function = %route.function,
                kind = %route.kind,
                "{} http://localhost:{port}{}",
                route.method,
                route.path
            );
        }
        if let Some(folder) = &self.options.static_folder {
            tracing::info!(folder = %folder.display(), "static files at http://localhost:{port}/static");
        }

        let router = self.finish_router(dispatcher);
        let runner = self.trigger_runner();
        let handles = runner.start();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        tracing::info!("shutting down triggers");
        runner.shutdown(handles).await;
        served.map_err(ServerError::from)
    }
}
