//! External stimuli that payload synthesis turns into handler events.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An inbound HTTP request, flattened for payload synthesis.
#[derive(Debug, Clone, Default)]
pub struct HttpStimulus {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub path_params: BTreeMap<String, String>,
    pub body: Bytes,
}

impl HttpStimulus {
    /// The body as text, or `None` when empty.
    pub fn body_text(&self) -> Option<String> {
        if self.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.body).into_owned())
        }
    }
}

/// A resolved queue, as returned by [`QueueClient::resolve_queue_handle`].
///
/// [`QueueClient::resolve_queue_handle`]: crate::traits::QueueClient::resolve_queue_handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHandle {
    pub name: String,
    pub url: String,
    pub arn: String,
    pub region: String,
}

/// A typed SQS message attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttribute {
    pub data_type: String,
    pub string_value: Option<String>,
}

/// One message returned by a receive call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Opaque token used to acknowledge (delete) the message.
    pub receipt_handle: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    pub message_attributes: BTreeMap<String, MessageAttribute>,
    pub md5_of_body: Option<String>,
}

/// A non-empty batch received from one queue.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub queue: QueueHandle,
    pub messages: Vec<ReceivedMessage>,
}

/// What caused an invocation.
#[derive(Debug, Clone)]
pub enum Stimulus {
    /// A request hitting a dispatcher route.
    Http(HttpStimulus),
    /// A schedule tick from the background ticker.
    Tick,
    /// A batch received by the queue consumer.
    Batch(MessageBatch),
}
