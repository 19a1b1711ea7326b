//! Queue consumption.
//!
//! A [`QueueConsumer`] long-polls one queue on behalf of one sqs trigger and
//! hands each non-empty batch to the invocation adapter. A batch is
//! acknowledged as a whole when the handler succeeds and left untouched
//! when it fails, so the backend redelivers it after its visibility timeout.

mod in_memory;
#[cfg(feature = "sqs")]
mod sqs;

pub use in_memory::InMemoryQueue;
#[cfg(feature = "sqs")]
pub use sqs::SqsQueueClient;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use crate::errors::TriggerError;
use crate::invoke::InvocationAdapter;
use crate::traits::QueueClient;
use crate::triggers::{batch_size, synthesize, RunningFlag};
use crate::types::{FunctionRecord, InvocationOutcome, MessageBatch, Stimulus, TriggerDescriptor};

/// Polling parameters shared by every consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Long-poll wait per receive call.
    pub wait: Duration,
    /// Batches allowed to be dispatched concurrently per queue. `1` keeps
    /// batches strictly sequential.
    pub max_in_flight_batches: usize,
    /// Pause after a failed resolve or receive.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(20),
            max_in_flight_batches: 1,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Long-poll loop for one sqs trigger.
#[derive(Clone)]
pub struct QueueConsumer {
    record: Arc<FunctionRecord>,
    descriptor: Arc<TriggerDescriptor>,
    client: Arc<dyn QueueClient>,
    adapter: Arc<InvocationAdapter>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(
        record: Arc<FunctionRecord>,
        descriptor: TriggerDescriptor,
        client: Arc<dyn QueueClient>,
        adapter: Arc<InvocationAdapter>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            record,
            descriptor: Arc::new(descriptor),
            client,
            adapter,
            config,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.record.name
    }

    /// Poll until `running` is cleared or `shutdown` fires.
    ///
    /// Resolve and receive errors are logged and retried after a backoff.
    /// Stopping takes effect between iterations: a receive in progress runs
    /// to completion, its messages are dispatched, and dispatched batches
    /// finish before returning.
    pub async fn run(
        &self,
        running: RunningFlag,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TriggerError> {
        let identity = self
            .descriptor
            .identity
            .clone()
            .ok_or_else(|| TriggerError::Runtime {
                message: format!("sqs trigger for {} has no queue identity", self.record.name),
            })?;

        let queue = loop {
            if !running.is_running() {
                return Ok(());
            }
            match self.client.resolve_queue_handle(&identity).await {
                Ok(queue) => break queue,
                Err(e) => {
                    tracing::warn!(function = %self.record.name, queue = %identity, "failed to resolve queue: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        _ = shutdown.recv() => return Ok(()),
                    }
                }
            }
        };

        let max_messages = batch_size(&self.descriptor);
        tracing::info!(
            function = %self.record.name,
            queue = %queue.name,
            batch_size = max_messages,
            "polling queue"
        );

        let permits = Arc::new(Semaphore::new(self.config.max_in_flight_batches.max(1)));
        let mut in_flight = JoinSet::new();

        while running.is_running() {
            while in_flight.try_join_next().is_some() {}

            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.recv() => break,
            };
            if !running.is_running() {
                break;
            }

            // Not raced against shutdown: a receive the backend has answered
            // has already hidden its messages, so they must be dispatched.
            let received = self
                .client
                .receive(&queue, max_messages, self.config.wait)
                .await;
            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(function = %self.record.name, queue = %queue.name, "receive failed: {e}");
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
            };
            if messages.is_empty() {
                continue;
            }

            let consumer = self.clone();
            let batch = MessageBatch {
                queue: queue.clone(),
                messages,
            };
            in_flight.spawn(async move {
                consumer.dispatch_batch(batch).await;
                drop(permit);
            });
        }

        while in_flight.join_next().await.is_some() {}
        tracing::debug!(function = %self.record.name, queue = %queue.name, "queue consumer stopped");
        Ok(())
    }

    /// Invoke the handler with one batch. Returns whether the batch was
    /// acknowledged.
    pub(crate) async fn dispatch_batch(&self, batch: MessageBatch) -> bool {
        let receipts: Vec<String> = batch
            .messages
            .iter()
            .map(|m| m.receipt_handle.clone())
            .collect();
        let queue = batch.queue.clone();
        let payload = synthesize(&self.descriptor, &Stimulus::Batch(batch));

        tracing::info!(
            function = %self.record.name,
            queue = %queue.name,
            messages = receipts.len(),
            "dispatching batch"
        );
        match self.adapter.invoke(&self.record, payload).await {
            InvocationOutcome::Success(_) => {
                match self.client.acknowledge(&queue, &receipts).await {
                    Ok(()) => {
                        tracing::debug!(queue = %queue.name, messages = receipts.len(), "batch acknowledged");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(queue = %queue.name, "failed to acknowledge batch: {e}");
                        false
                    }
                }
            }
            InvocationOutcome::Failure(e) => {
                tracing::warn!(
                    function = %self.record.name,
                    queue = %queue.name,
                    "Failure: {e}; batch left for redelivery"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::errors::{HandlerError, QueueError};
    use crate::handlers::HandlerRegistry;
    use crate::invoke::{EnvironmentLayers, InvocationContext};
    use crate::traits::AsyncHandler;
    use crate::triggers::{compile, CompileOptions};
    use crate::types::{HandlerRef, QueueHandle, ReceivedMessage};

    fn record() -> Arc<FunctionRecord> {
        Arc::new(FunctionRecord {
            name: "worker".into(),
            handler: HandlerRef {
                module: "index".into(),
                entry: "worker".into(),
            },
            environment: BTreeMap::new(),
            triggers: vec![],
        })
    }

    fn descriptor(config: Value) -> TriggerDescriptor {
        compile("worker", &[json!({ "sqs": config })], &CompileOptions::default())
            .expect("compiles")
            .remove(0)
    }

    fn fast_config() -> ConsumerConfig {
        ConsumerConfig {
            wait: Duration::from_millis(20),
            max_in_flight_batches: 1,
            retry_backoff: Duration::from_millis(10),
        }
    }

    /// Handler that reports every batch and fails when any body is "fail".
    fn adapter(tx: mpsc::UnboundedSender<Vec<String>>) -> Arc<InvocationAdapter> {
        let registry = HandlerRegistry::new().register(
            "index.worker",
            AsyncHandler(move |event: Value, _ctx: InvocationContext| {
                let tx = tx.clone();
                async move {
                    let bodies: Vec<String> = event["Records"]
                        .as_array()
                        .map(|records| {
                            records
                                .iter()
                                .filter_map(|r| r["body"].as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    let failed = bodies.iter().any(|b| b == "fail");
                    let _ = tx.send(bodies);
                    if failed {
                        Err(HandlerError::new("batch rejected"))
                    } else {
                        Ok(Value::Null)
                    }
                }
            }),
        );
        Arc::new(InvocationAdapter::new(
            Arc::new(registry),
            EnvironmentLayers::with_baseline(BTreeMap::new(), None),
        ))
    }

    #[tokio::test]
    async fn test_successful_batch_acknowledged() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.create_queue("jobs").await;
        for body in ["a", "b", "c"] {
            queue.send("jobs", body).await.expect("send");
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = QueueConsumer::new(
            record(),
            descriptor(json!({"arn": "arn:aws:sqs:local:000000000000:jobs", "batchSize": 10})),
            queue.clone(),
            adapter(tx),
            fast_config(),
        );
        let running = RunningFlag::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let running = running.clone();
            tokio::spawn(async move { consumer.run(running, shutdown_rx).await })
        };

        let bodies = rx.recv().await.expect("batch delivered");
        assert_eq!(bodies, vec!["a", "b", "c"]);

        running.stop();
        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("consumer ok");
        assert_eq!(queue.counts("jobs").await.expect("counts"), (0, 0));
    }

    #[tokio::test]
    async fn test_failed_batch_left_for_redelivery() {
        let queue = Arc::new(InMemoryQueue::new().with_visibility_timeout(Duration::from_secs(60)));
        queue.create_queue("jobs").await;
        queue.send("jobs", "ok").await.expect("send");
        queue.send("jobs", "fail").await.expect("send");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = QueueConsumer::new(
            record(),
            descriptor(json!("jobs")),
            queue.clone(),
            adapter(tx),
            fast_config(),
        );
        let handle = queue.resolve_queue_handle("jobs").await.expect("resolve");
        let messages = queue.receive(&handle, 10, Duration::ZERO).await.expect("receive");

        let acked = consumer
            .dispatch_batch(MessageBatch {
                queue: handle,
                messages,
            })
            .await;
        assert!(!acked);
        assert_eq!(rx.recv().await.expect("batch"), vec!["ok", "fail"]);
        // Neither message was deleted, including the one that looked fine.
        assert_eq!(queue.counts("jobs").await.expect("counts"), (0, 2));
    }

    #[tokio::test]
    async fn test_batch_size_limits_receive() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.create_queue("jobs").await;
        for i in 0..5 {
            queue.send("jobs", format!("m{i}")).await.expect("send");
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = QueueConsumer::new(
            record(),
            descriptor(json!({"arn": "jobs", "batchSize": 2})),
            queue.clone(),
            adapter(tx),
            fast_config(),
        );
        let running = RunningFlag::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let running = running.clone();
            tokio::spawn(async move { consumer.run(running, shutdown_rx).await })
        };

        let mut sizes = Vec::new();
        let mut seen = 0;
        while seen < 5 {
            let batch = rx.recv().await.expect("batch");
            seen += batch.len();
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);

        running.stop();
        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("consumer ok");
    }

    /// Fails the first receive, then delegates.
    struct FlakyQueue {
        inner: InMemoryQueue,
        receive_calls: AtomicUsize,
    }

    #[async_trait]
    impl QueueClient for FlakyQueue {
        async fn resolve_queue_handle(&self, identity: &str) -> Result<QueueHandle, QueueError> {
            self.inner.resolve_queue_handle(identity).await
        }

        async fn receive(
            &self,
            queue: &QueueHandle,
            max_messages: u32,
            wait: Duration,
        ) -> Result<Vec<ReceivedMessage>, QueueError> {
            if self.receive_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(QueueError::Queue {
                    message: "connection reset".into(),
                });
            }
            self.inner.receive(queue, max_messages, wait).await
        }

        async fn acknowledge(
            &self,
            queue: &QueueHandle,
            receipt_handles: &[String],
        ) -> Result<(), QueueError> {
            self.inner.acknowledge(queue, receipt_handles).await
        }
    }

    #[tokio::test]
    async fn test_receive_error_does_not_stop_loop() {
        let inner = InMemoryQueue::new();
        inner.create_queue("jobs").await;
        inner.send("jobs", "survivor").await.expect("send");
        let queue = Arc::new(FlakyQueue {
            inner,
            receive_calls: AtomicUsize::new(0),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = QueueConsumer::new(
            record(),
            descriptor(json!("jobs")),
            queue.clone(),
            adapter(tx),
            fast_config(),
        );
        let running = RunningFlag::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let running = running.clone();
            tokio::spawn(async move { consumer.run(running, shutdown_rx).await })
        };

        assert_eq!(rx.recv().await.expect("batch"), vec!["survivor"]);
        assert!(queue.receive_calls.load(Ordering::SeqCst) >= 2);

        running.stop();
        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("consumer ok");
    }

    #[tokio::test]
    async fn test_cleared_flag_stops_before_polling() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.create_queue("jobs").await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let consumer = QueueConsumer::new(
            record(),
            descriptor(json!("jobs")),
            queue,
            adapter(tx),
            fast_config(),
        );
        let running = RunningFlag::new();
        running.stop();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        consumer.run(running, shutdown_rx).await.expect("stops cleanly");
    }

    /// Announces each receive, sleeps, then delegates without waiting.
    struct SlowQueue {
        inner: InMemoryQueue,
        delay: Duration,
        started: mpsc::UnboundedSender<()>,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl QueueClient for SlowQueue {
        async fn resolve_queue_handle(&self, identity: &str) -> Result<QueueHandle, QueueError> {
            self.inner.resolve_queue_handle(identity).await
        }

        async fn receive(
            &self,
            queue: &QueueHandle,
            max_messages: u32,
            _wait: Duration,
        ) -> Result<Vec<ReceivedMessage>, QueueError> {
            let _ = self.started.send(());
            tokio::time::sleep(self.delay).await;
            let batch = self.inner.receive(queue, max_messages, Duration::ZERO).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            batch
        }

        async fn acknowledge(
            &self,
            queue: &QueueHandle,
            receipt_handles: &[String],
        ) -> Result<(), QueueError> {
            self.inner.acknowledge(queue, receipt_handles).await
        }
    }

    #[tokio::test]
    async fn test_shutdown_lets_pending_receive_finish() {
        let inner = InMemoryQueue::new();
        inner.create_queue("jobs").await;
        inner.send("jobs", "mid-flight").await.expect("send");
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(SlowQueue {
            inner: inner.clone(),
            delay: Duration::from_millis(200),
            started: started_tx,
            finished: AtomicUsize::new(0),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = QueueConsumer::new(
            record(),
            descriptor(json!("jobs")),
            queue.clone(),
            adapter(tx),
            fast_config(),
        );
        let running = RunningFlag::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let running = running.clone();
            tokio::spawn(async move { consumer.run(running, shutdown_rx).await })
        };

        started_rx.recv().await.expect("receive started");
        running.stop();
        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("consumer ok");

        assert_eq!(queue.finished.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.expect("batch dispatched"), vec!["mid-flight"]);
        assert_eq!(inner.counts("jobs").await.expect("counts"), (0, 0));
    }

    #[tokio::test]
    async fn test_in_flight_bound_allows_concurrent_batches() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.create_queue("jobs").await;
        for body in ["one", "two", "three"] {
            queue.send("jobs", body).await.expect("send");
        }

        // Handlers park on the gate until the test releases them.
        let gate = Arc::new(Semaphore::new(0));
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel::<String>();
        let registry = HandlerRegistry::new().register(
            "index.worker",
            AsyncHandler({
                let gate = Arc::clone(&gate);
                move |event: Value, _ctx: InvocationContext| {
                    let gate = Arc::clone(&gate);
                    let entered = entered_tx.clone();
                    async move {
                        let body = event["Records"][0]["body"].as_str().unwrap_or_default();
                        let _ = entered.send(body.to_string());
                        match gate.acquire().await {
                            Ok(_permit) => Ok(Value::Null),
                            Err(_) => Err(HandlerError::new("gate closed")),
                        }
                    }
                }
            }),
        );
        let adapter = Arc::new(InvocationAdapter::new(
            Arc::new(registry),
            EnvironmentLayers::with_baseline(BTreeMap::new(), None),
        ));

        let consumer = QueueConsumer::new(
            record(),
            descriptor(json!({"arn": "jobs", "batchSize": 1})),
            queue.clone(),
            adapter,
            ConsumerConfig {
                max_in_flight_batches: 2,
                ..fast_config()
            },
        );
        let running = RunningFlag::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let running = running.clone();
            tokio::spawn(async move { consumer.run(running, shutdown_rx).await })
        };

        let mut first_two = Vec::new();
        for _ in 0..2 {
            let body = tokio::time::timeout(Duration::from_secs(2), entered_rx.recv())
                .await
                .expect("batch entered in time")
                .expect("entered");
            first_two.push(body);
        }
        first_two.sort();
        assert_eq!(first_two, vec!["one", "two"]);

        // Both permits are held, so the third message is never received.
        assert!(
            tokio::time::timeout(Duration::from_millis(150), entered_rx.recv())
                .await
                .is_err()
        );
        assert_eq!(queue.counts("jobs").await.expect("counts"), (1, 2));

        gate.add_permits(3);
        let third = tokio::time::timeout(Duration::from_secs(2), entered_rx.recv())
            .await
            .expect("third batch entered in time")
            .expect("entered");
        assert_eq!(third, "three");

        for _ in 0..200 {
            if queue.counts("jobs").await.expect("counts") == (0, 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        running.stop();
        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("consumer ok");
        assert_eq!(queue.counts("jobs").await.expect("counts"), (0, 0));
    }
}
