//! S3 bucket notification triggers.
//!
//! Config is a bucket name (or ARN) or `{ bucket, event, rules }`. The route
//! encodes the event type and key filter, e.g.
//! `/s3/thumbnails/created/uploads/photos/.jpg`.

use serde_json::Value;

use super::super::errors::TriggerError;
use super::super::types::{Stimulus, TriggerDescriptor, TriggerKind};
use super::{events, passthrough_body, required_str, shorthand, slug_path, slug_segment};
use super::{CompileContext, CompiledRoute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum S3EventType {
    Created,
    Deleted,
    All,
}

impl S3EventType {
    fn from_config(config: &Value) -> Self {
        let event = config.get("event").and_then(Value::as_str).unwrap_or_default();
        if event.contains("ObjectRemoved") {
            Self::Deleted
        } else if event.contains("ObjectCreated") {
            Self::Created
        } else {
            Self::All
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::All => "all",
        }
    }
}

/// Key filter rules, written either as a mapping or as a list of
/// single-key mappings.
fn rule(config: &Value, name: &str) -> Option<String> {
    let rules = config.get("rules")?;
    let found = match rules {
        Value::Object(map) => map.get(name),
        Value::Array(items) => items.iter().find_map(|item| item.get(name)),
        _ => None,
    };
    found
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.strip_prefix('/').unwrap_or(prefix);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    format!("{trimmed}/")
}

pub(super) fn compile(
    config: &Value,
    context: &CompileContext<'_>,
) -> Result<CompiledRoute, TriggerError> {
    let config = shorthand(config, "bucket");
    let bucket = required_str(&config, "bucket", TriggerKind::S3)?;
    let bucket_name = bucket.rsplit(':').next().unwrap_or(bucket);

    let event_type = S3EventType::from_config(&config);
    let prefix = rule(&config, "prefix")
        .map(|p| normalize_prefix(&p))
        .unwrap_or_default();
    let suffix = rule(&config, "suffix").unwrap_or_default();

    let mut path = format!(
        "{}/{}/{}/{}{}/{}",
        TriggerKind::S3.route_prefix(),
        slug_segment(context.function_name),
        event_type.as_str(),
        slug_path(&prefix),
        slug_segment(bucket_name),
        slug_path(&suffix),
    );
    if path.ends_with('/') {
        path.pop();
    }

    Ok(CompiledRoute {
        method: Some("GET".into()),
        path: Some(path),
        identity: Some(bucket_name.to_string()),
        cors_enabled: false,
        passthrough_post: true,
    })
}

pub(super) fn synthesize(descriptor: &TriggerDescriptor, stimulus: &Stimulus) -> Value {
    if let Stimulus::Http(request) = stimulus {
        if let Some(body) = passthrough_body(request) {
            return body;
        }
    }
    match S3EventType::from_config(&descriptor.raw_config) {
        S3EventType::Deleted => events::s3_delete_event(),
        S3EventType::Created | S3EventType::All => events::s3_put_event(),
    }
}
