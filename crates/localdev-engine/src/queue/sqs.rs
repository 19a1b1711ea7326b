//! Amazon SQS backend built on `aws-sdk-sqs`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::types::{
    DeleteMessageBatchRequestEntry, Message, MessageSystemAttributeName, QueueAttributeName,
};

use crate::errors::QueueError;
use crate::traits::QueueClient;
use crate::triggers::queue_name_from_identity;
use crate::types::{MessageAttribute, QueueHandle, ReceivedMessage};

const MAX_DELETE_BATCH: usize = 10;

fn queue_error(context: &str, error: impl std::fmt::Display) -> QueueError {
    QueueError::Queue {
        message: format!("{context}: {error}"),
    }
}

/// SQS client using the standard AWS credential and region chain.
#[derive(Clone)]
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
}

impl SqsQueueClient {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }

    /// Load shared config, optionally pinned to a named profile and region.
    pub async fn from_profile(profile: Option<&str>, region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;
        Self::new(aws_sdk_sqs::Client::new(&config))
    }

    async fn queue_url(&self, identity: &str) -> Result<String, QueueError> {
        if identity.starts_with("https://") || identity.starts_with("http://") {
            return Ok(identity.to_string());
        }
        let name = queue_name_from_identity(identity);
        let output = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|error| queue_error(&format!("failed to look up queue {name}"), error))?;
        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| QueueError::NotFound {
                queue: name.to_string(),
            })
    }
}

fn convert(message: &Message) -> Option<ReceivedMessage> {
    let attributes = message
        .attributes()
        .map(|attrs| {
            attrs
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                .collect()
        })
        .unwrap_or_default();
    let message_attributes = message
        .message_attributes()
        .map(|attrs| {
            attrs
                .iter()
                .map(|(name, value)| {
                    (
                        name.clone(),
                        MessageAttribute {
                            data_type: value.data_type().to_string(),
                            string_value: value.string_value().map(str::to_string),
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    Some(ReceivedMessage {
        message_id: message.message_id()?.to_string(),
        receipt_handle: message.receipt_handle()?.to_string(),
        body: message.body().unwrap_or_default().to_string(),
        attributes,
        message_attributes,
        md5_of_body: message.md5_of_body().map(str::to_string),
    })
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn resolve_queue_handle(&self, identity: &str) -> Result<QueueHandle, QueueError> {
        let url = self.queue_url(identity).await?;
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|error| queue_error("failed to read queue attributes", error))?;
        let arn = output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .cloned()
            .unwrap_or_else(|| identity.to_string());
        let region = arn
            .split(':')
            .nth(3)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| self.client.config().region().map(|r| r.to_string()))
            .unwrap_or_default();

        Ok(QueueHandle {
            name: queue_name_from_identity(&url).to_string(),
            url,
            arn,
            region,
        })
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&queue.url)
            .max_number_of_messages(max_messages.clamp(1, 10) as i32)
            .wait_time_seconds(wait.as_secs().min(20) as i32)
            .message_attribute_names("All")
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|error| queue_error("receive failed", error))?;
        Ok(output.messages().iter().filter_map(convert).collect())
    }

    async fn acknowledge(
        &self,
        queue: &QueueHandle,
        receipt_handles: &[String],
    ) -> Result<(), QueueError> {
        for chunk in receipt_handles.chunks(MAX_DELETE_BATCH) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, receipt)| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .receipt_handle(receipt)
                        .build()
                        .map_err(|error| queue_error("invalid delete entry", error))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let output = self
                .client
                .delete_message_batch()
                .queue_url(&queue.url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|error| queue_error("delete failed", error))?;
            if let Some(failed) = output.failed().first() {
                return Err(queue_error(
                    "delete rejected",
                    failed.message().unwrap_or_else(|| failed.code()),
                ));
            }
        }
        Ok(())
    }
}
