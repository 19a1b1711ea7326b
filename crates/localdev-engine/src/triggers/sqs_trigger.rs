//! SQS queue triggers.
//!
//! Config is a queue ARN (or URL, or name) or `{ arn, batchSize, enabled }`.
//! The route only pokes the handler with an example event; real delivery
//! goes through the queue consumer when polling is enabled.

use serde_json::{json, Value};

use super::super::errors::TriggerError;
use super::super::types::{MessageBatch, Stimulus, TriggerDescriptor, TriggerKind};
use super::{events, passthrough_body, shorthand, slug_segment};
use super::{CompileContext, CompiledRoute};

pub const DEFAULT_BATCH_SIZE: u32 = 10;
const MAX_BATCH_SIZE: u32 = 10;

/// The queue name from an ARN (`...:name`), URL (`.../name`) or bare name.
pub fn queue_name_from_identity(identity: &str) -> &str {
    let identity = identity.trim_end_matches('/');
    if identity.starts_with("http://") || identity.starts_with("https://") {
        identity.rsplit('/').next().unwrap_or(identity)
    } else {
        identity.rsplit(':').next().unwrap_or(identity)
    }
}

/// `batchSize` from the trigger config, clamped to `1..=10`.
pub fn batch_size(descriptor: &TriggerDescriptor) -> u32 {
    descriptor
        .raw_config
        .get("batchSize")
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|n| n.clamp(1, u64::from(MAX_BATCH_SIZE)) as u32)
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

pub(super) fn compile(
    config: &Value,
    context: &CompileContext<'_>,
) -> Result<CompiledRoute, TriggerError> {
    let config = shorthand(config, "arn");
    let identity = ["arn", "queueName", "queue"]
        .iter()
        .find_map(|key| config.get(*key).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TriggerError::config("sqs trigger requires an 'arn' or 'queueName' string"))?;
    let name = queue_name_from_identity(identity);

    Ok(CompiledRoute {
        method: Some("GET".into()),
        path: Some(format!(
            "{}/{}/{}",
            TriggerKind::Sqs.route_prefix(),
            slug_segment(context.function_name),
            slug_segment(name)
        )),
        identity: Some(identity.to_string()),
        cors_enabled: false,
        passthrough_post: true,
    })
}

fn records(batch: &MessageBatch) -> Value {
    let records: Vec<Value> = batch
        .messages
        .iter()
        .map(|message| {
            let message_attributes: serde_json::Map<String, Value> = message
                .message_attributes
                .iter()
                .map(|(name, attr)| {
                    (
                        name.clone(),
                        json!({
                            "stringValue": attr.string_value,
                            "stringListValues": [],
                            "binaryListValues": [],
                            "dataType": attr.data_type,
                        }),
                    )
                })
                .collect();
            json!({
                "messageId": message.message_id,
                "receiptHandle": message.receipt_handle,
                "body": message.body,
                "attributes": message.attributes,
                "messageAttributes": message_attributes,
                "md5OfBody": message.md5_of_body,
                "eventSource": "aws:sqs",
                "eventSourceARN": batch.queue.arn,
                "awsRegion": batch.queue.region,
            })
        })
        .collect();
    json!({ "Records": records })
}

pub(super) fn synthesize(descriptor: &TriggerDescriptor, stimulus: &Stimulus) -> Value {
    match stimulus {
        Stimulus::Batch(batch) => records(batch),
        Stimulus::Http(request) => passthrough_body(request)
            .unwrap_or_else(|| events::sqs_example_event(example_queue_name(descriptor))),
        Stimulus::Tick => events::sqs_example_event(example_queue_name(descriptor)),
    }
}

fn example_queue_name(descriptor: &TriggerDescriptor) -> &str {
    descriptor
        .identity
        .as_deref()
        .map(queue_name_from_identity)
        .unwrap_or("queue")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::{compile as compile_all, CompileOptions};
    use super::*;
    use crate::types::{MessageAttribute, QueueHandle, ReceivedMessage};

    fn sqs(config: Value) -> TriggerDescriptor {
        compile_all("worker", &[json!({ "sqs": config })], &CompileOptions::default())
            .expect("compiles")
            .remove(0)
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(queue_name_from_identity("arn:aws:sqs:us-east-1:123456789012:jobs"), "jobs");
        assert_eq!(
            queue_name_from_identity("https://sqs.us-east-1.amazonaws.com/123456789012/jobs"),
            "jobs"
        );
        assert_eq!(queue_name_from_identity("jobs"), "jobs");
    }

    #[test]
    fn test_route_under_sqs_prefix() {
        let d = sqs(json!("arn:aws:sqs:us-east-1:123456789012:jobs"));
        assert_eq!(d.path.as_deref(), Some("/sqs/worker/jobs"));
        assert_eq!(d.response_mode, crate::types::ResponseMode::FixedAcknowledge);
    }

    #[test]
    fn test_batch_size_clamped() {
        assert_eq!(batch_size(&sqs(json!({"arn": "q", "batchSize": 3}))), 3);
        assert_eq!(batch_size(&sqs(json!({"arn": "q", "batchSize": 500}))), 10);
        assert_eq!(batch_size(&sqs(json!({"arn": "q", "batchSize": 0}))), 1);
        assert_eq!(batch_size(&sqs(json!({"arn": "q", "batchSize": "4"}))), 4);
        assert_eq!(batch_size(&sqs(json!("q"))), DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_batch_records_preserve_order() {
        let d = sqs(json!("jobs"));
        let message = |id: &str| ReceivedMessage {
            message_id: id.into(),
            receipt_handle: format!("rh-{id}"),
            body: format!("body-{id}"),
            attributes: BTreeMap::from([("ApproximateReceiveCount".to_string(), "1".to_string())]),
            message_attributes: BTreeMap::from([(
                "kind".to_string(),
                MessageAttribute {
                    data_type: "String".into(),
                    string_value: Some("x".into()),
                },
            )]),
            md5_of_body: None,
        };
        let batch = MessageBatch {
            queue: QueueHandle {
                name: "jobs".into(),
                url: "local://jobs".into(),
                arn: "arn:aws:sqs:local:000000000000:jobs".into(),
                region: "local".into(),
            },
            messages: vec![message("a"), message("b")],
        };

        let event = synthesize(&d, &Stimulus::Batch(batch));
        let records = event["Records"].as_array().expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["messageId"], "a");
        assert_eq!(records[1]["receiptHandle"], "rh-b");
        assert_eq!(records[0]["eventSourceARN"], "arn:aws:sqs:local:000000000000:jobs");
        assert_eq!(records[0]["messageAttributes"]["kind"]["stringValue"], "x");
    }

    #[test]
    fn test_poke_uses_example_event() {
        let d = sqs(json!("arn:aws:sqs:us-east-1:123456789012:jobs"));
        let event = synthesize(&d, &Stimulus::Tick);
        assert_eq!(
            event["Records"][0]["eventSourceARN"],
            "arn:aws:sqs:us-east-1:123456789012:jobs"
        );
    }
}
