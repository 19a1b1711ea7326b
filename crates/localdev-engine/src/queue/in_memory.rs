//! In-memory queue with SQS-style visibility semantics.
//!
//! Received messages move to an in-flight set with a visibility deadline.
//! Acknowledged messages are deleted; unacknowledged ones become visible
//! again once the deadline passes and are redelivered.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

use crate::errors::QueueError;
use crate::traits::QueueClient;
use crate::triggers::queue_name_from_identity;
use crate::types::{MessageAttribute, QueueHandle, ReceivedMessage};

const LOCAL_ACCOUNT: &str = "000000000000";

/// In-memory queue backend, keyed by queue name.
#[derive(Clone)]
pub struct InMemoryQueue {
    queues: Arc<RwLock<HashMap<String, Arc<QueueState>>>>,
    visibility_timeout: Duration,
    region: String,
}

struct QueueState {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

#[derive(Default)]
struct QueueInner {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
}

#[derive(Clone)]
struct StoredMessage {
    id: String,
    body: String,
    message_attributes: BTreeMap<String, MessageAttribute>,
    sent_at_ms: i64,
    first_received_ms: Option<i64>,
    receive_count: u32,
}

struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

impl QueueInner {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                self.ready.push_back(flight.message);
            }
        }
    }

    fn take(&mut self, max: usize, now: Instant, visibility: Duration) -> Vec<ReceivedMessage> {
        self.requeue_expired(now);
        let now_ms = Utc::now().timestamp_millis();
        let mut received = Vec::new();
        while received.len() < max {
            let Some(mut message) = self.ready.pop_front() else {
                break;
            };
            message.receive_count += 1;
            let first_received = *message.first_received_ms.get_or_insert(now_ms);
            let receipt = uuid::Uuid::new_v4().to_string();

            received.push(ReceivedMessage {
                message_id: message.id.clone(),
                receipt_handle: receipt.clone(),
                body: message.body.clone(),
                attributes: BTreeMap::from([
                    (
                        "ApproximateReceiveCount".to_string(),
                        message.receive_count.to_string(),
                    ),
                    ("SentTimestamp".to_string(), message.sent_at_ms.to_string()),
                    (
                        "ApproximateFirstReceiveTimestamp".to_string(),
                        first_received.to_string(),
                    ),
                ]),
                message_attributes: message.message_attributes.clone(),
                md5_of_body: None,
            });
            self.in_flight.insert(
                receipt,
                InFlight {
                    message,
                    visible_at: now + visibility,
                },
            );
        }
        received
    }

    fn next_visible(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.visible_at).min()
    }
}

impl InMemoryQueue {
    pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create an empty backend with the default visibility timeout.
    pub fn new() -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            visibility_timeout: Self::DEFAULT_VISIBILITY_TIMEOUT,
            region: "local".to_string(),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn handle(&self, name: &str) -> QueueHandle {
        QueueHandle {
            name: name.to_string(),
            url: format!("http://localhost/{LOCAL_ACCOUNT}/{name}"),
            arn: format!("arn:aws:sqs:{}:{LOCAL_ACCOUNT}:{name}", self.region),
            region: self.region.clone(),
        }
    }

    /// Create a queue if it does not exist yet.
    pub async fn create_queue(&self, name: &str) -> QueueHandle {
        let mut queues = self.queues.write().await;
        queues.entry(name.to_string()).or_insert_with(|| {
            Arc::new(QueueState {
                inner: Mutex::new(QueueInner::default()),
                notify: Notify::new(),
            })
        });
        self.handle(name)
    }

    async fn state(&self, name: &str) -> Result<Arc<QueueState>, QueueError> {
        self.queues
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::NotFound {
                queue: name.to_string(),
            })
    }

    pub async fn send(&self, queue: &str, body: impl Into<String>) -> Result<String, QueueError> {
        self.send_with_attributes(queue, body, BTreeMap::new()).await
    }

    pub async fn send_with_attributes(
        &self,
        queue: &str,
        body: impl Into<String>,
        message_attributes: BTreeMap<String, MessageAttribute>,
    ) -> Result<String, QueueError> {
        let state = self.state(queue).await?;
        let id = uuid::Uuid::new_v4().to_string();
        state.inner.lock().ready.push_back(StoredMessage {
            id: id.clone(),
            body: body.into(),
            message_attributes,
            sent_at_ms: Utc::now().timestamp_millis(),
            first_received_ms: None,
            receive_count: 0,
        });
        state.notify.notify_waiters();
        Ok(id)
    }

    /// `(visible, in_flight)` message counts.
    pub async fn counts(&self, queue: &str) -> Result<(usize, usize), QueueError> {
        let state = self.state(queue).await?;
        let mut inner = state.inner.lock();
        inner.requeue_expired(Instant::now());
        Ok((inner.ready.len(), inner.in_flight.len()))
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn resolve_queue_handle(&self, identity: &str) -> Result<QueueHandle, QueueError> {
        let name = queue_name_from_identity(identity);
        self.state(name).await?;
        Ok(self.handle(name))
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let state = self.state(&queue.name).await?;
        let deadline = Instant::now() + wait;

        loop {
            // Registered before checking so a concurrent send is not missed.
            let notified = state.notify.notified();
            let (batch, next_visible) = {
                let mut inner = state.inner.lock();
                let batch = inner.take(
                    max_messages.max(1) as usize,
                    Instant::now(),
                    self.visibility_timeout,
                );
                (batch, inner.next_visible())
            };
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_visible.map_or(deadline, |v| v.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(
        &self,
        queue: &QueueHandle,
        receipt_handles: &[String],
    ) -> Result<(), QueueError> {
        let state = self.state(&queue.name).await?;
        let mut inner = state.inner.lock();
        for receipt in receipt_handles {
            if inner.in_flight.remove(receipt).is_none() {
                tracing::debug!(queue = %queue.name, "unknown or expired receipt handle");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_ack() {
        let queue = InMemoryQueue::new();
        let handle = queue.create_queue("jobs").await;
        queue.send("jobs", "one").await.expect("send");
        queue.send("jobs", "two").await.expect("send");

        let batch = queue.receive(&handle, 10, Duration::ZERO).await.expect("receive");
        let bodies: Vec<&str> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
        assert_eq!(batch[0].attributes["ApproximateReceiveCount"], "1");
        assert_eq!(queue.counts("jobs").await.expect("counts"), (0, 2));

        let receipts: Vec<String> = batch.iter().map(|m| m.receipt_handle.clone()).collect();
        queue.acknowledge(&handle, &receipts).await.expect("ack");
        assert_eq!(queue.counts("jobs").await.expect("counts"), (0, 0));
    }

    #[tokio::test]
    async fn test_max_messages_respected() {
        let queue = InMemoryQueue::new();
        let handle = queue.create_queue("jobs").await;
        for i in 0..5 {
            queue.send("jobs", format!("m{i}")).await.expect("send");
        }
        let batch = queue.receive(&handle, 2, Duration::ZERO).await.expect("receive");
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.counts("jobs").await.expect("counts"), (3, 2));
    }

    #[tokio::test]
    async fn test_unacked_messages_redelivered_after_timeout() {
        tokio::time::pause();
        let queue = InMemoryQueue::new().with_visibility_timeout(Duration::from_secs(5));
        let handle = queue.create_queue("jobs").await;
        queue.send("jobs", "retry me").await.expect("send");

        let first = queue.receive(&handle, 1, Duration::ZERO).await.expect("receive");
        assert_eq!(first.len(), 1);
        assert!(queue
            .receive(&handle, 1, Duration::ZERO)
            .await
            .expect("receive")
            .is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        let second = queue.receive(&handle, 1, Duration::ZERO).await.expect("receive");
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].attributes["ApproximateReceiveCount"], "2");
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_send() {
        let queue = Arc::new(InMemoryQueue::new());
        let handle = queue.create_queue("jobs").await;

        let receiver = {
            let queue = Arc::clone(&queue);
            let handle = handle.clone();
            tokio::spawn(async move { queue.receive(&handle, 10, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.send("jobs", "late").await.expect("send");

        let batch = receiver.await.expect("join").expect("receive");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test]
    async fn test_long_poll_times_out_empty() {
        tokio::time::pause();
        let queue = InMemoryQueue::new();
        let handle = queue.create_queue("idle").await;
        let batch = queue
            .receive(&handle, 10, Duration::from_secs(20))
            .await
            .expect("receive");
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_by_arn_and_missing_queue() {
        let queue = InMemoryQueue::new();
        queue.create_queue("jobs").await;
        let handle = queue
            .resolve_queue_handle("arn:aws:sqs:us-east-1:123456789012:jobs")
            .await
            .expect("resolves");
        assert_eq!(handle.name, "jobs");
        assert!(matches!(
            queue.resolve_queue_handle("missing").await,
            Err(QueueError::NotFound { .. })
        ));
    }
}
