//! Background trigger lifecycle management.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::super::queue::QueueConsumer;
use super::ticker::ScheduleTicker;

/// Process-wide "keep polling" flag. Cleared once on shutdown.
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the schedule tickers and queue consumers.
///
/// Each runs in its own tokio task. The runner provides a unified
/// start/shutdown interface.
pub struct TriggerRunner {
    tickers: Vec<ScheduleTicker>,
    consumers: Vec<QueueConsumer>,
    running: RunningFlag,
    shutdown_tx: broadcast::Sender<()>,
}

impl TriggerRunner {
    pub fn new(
        tickers: Vec<ScheduleTicker>,
        consumers: Vec<QueueConsumer>,
        running: RunningFlag,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tickers,
            consumers,
            running,
            shutdown_tx,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() && self.consumers.is_empty()
    }

    /// Spawn a task per ticker and consumer.
    ///
    /// Returns the `JoinHandle`s so the caller can await them.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let tickers = self.tickers.iter().map(|ticker| {
            let ticker = ticker.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = ticker.run(shutdown_rx).await {
                    tracing::error!(function = %ticker.function_name(), "schedule ticker failed: {e}");
                }
            })
        });
        let consumers = self.consumers.iter().map(|consumer| {
            let consumer = consumer.clone();
            let running = self.running.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = consumer.run(running, shutdown_rx).await {
                    tracing::error!(function = %consumer.function_name(), "queue consumer failed: {e}");
                }
            })
        });
        tickers.chain(consumers).collect()
    }

    /// Clear the running flag, signal shutdown and await all tasks.
    pub async fn shutdown(self, handles: Vec<JoinHandle<()>>) {
        self.running.stop();
        // Ignore send error: receivers may already be dropped.
        let _ = self.shutdown_tx.send(());

        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::super::{compile, CompileOptions};
    use super::*;
    use crate::errors::HandlerError;
    use crate::handlers::HandlerRegistry;
    use crate::invoke::{EnvironmentLayers, InvocationAdapter, InvocationContext};
    use crate::queue::{ConsumerConfig, InMemoryQueue};
    use crate::traits::AsyncHandler;
    use crate::types::{FunctionRecord, HandlerRef};

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = HandlerRegistry::new().register(
            "index.worker",
            AsyncHandler(move |event: Value, _ctx: InvocationContext| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                    Ok::<_, HandlerError>(Value::Null)
                }
            }),
        );
        let adapter = Arc::new(InvocationAdapter::new(
            Arc::new(registry),
            EnvironmentLayers::with_baseline(BTreeMap::new(), None),
        ));
        let descriptors = compile(
            "worker",
            &[json!({"sqs": "jobs"}), json!({"schedule": "rate(1 hour)"})],
            &CompileOptions::default(),
        )
        .expect("compiles");
        let record = Arc::new(FunctionRecord {
            name: "worker".into(),
            handler: HandlerRef {
                module: "index".into(),
                entry: "worker".into(),
            },
            environment: BTreeMap::new(),
            triggers: descriptors.clone(),
        });

        let queue = Arc::new(InMemoryQueue::new());
        queue.create_queue("jobs").await;
        queue.send("jobs", "hello").await.expect("send");

        let consumer = QueueConsumer::new(
            Arc::clone(&record),
            descriptors[0].clone(),
            queue.clone(),
            Arc::clone(&adapter),
            ConsumerConfig {
                wait: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let ticker = ScheduleTicker::new(Arc::clone(&record), descriptors[1].clone(), adapter);

        let runner = TriggerRunner::new(vec![ticker], vec![consumer], RunningFlag::new());
        assert!(!runner.is_empty());
        let handles = runner.start();
        assert_eq!(handles.len(), 2);

        let event = rx.recv().await.expect("batch delivered");
        assert_eq!(event["Records"][0]["body"], "hello");

        runner.shutdown(handles).await;
        assert_eq!(queue.counts("jobs").await.expect("counts"), (0, 0));
    }

    #[test]
    fn test_running_flag() {
        let flag = RunningFlag::new();
        let clone = flag.clone();
        assert!(clone.is_running());
        flag.stop();
        assert!(!clone.is_running());
    }
}
