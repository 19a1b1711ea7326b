//! Trigger descriptors: the compiled, immutable form of one trigger config.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Trigger kinds
// ---------------------------------------------------------------------------

/// The event sources the emulator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TriggerKind {
    Http,
    Schedule,
    S3,
    CloudwatchLog,
    Sqs,
}

impl TriggerKind {
    /// Map a trigger key from the service definition to a kind.
    ///
    /// Unknown keys return `None` and are dropped by the compiler.
    pub fn from_config_key(key: &str) -> Option<Self> {
        match key {
            "http" => Some(Self::Http),
            "schedule" => Some(Self::Schedule),
            "s3" => Some(Self::S3),
            "cloudwatchLog" => Some(Self::CloudwatchLog),
            "sqs" => Some(Self::Sqs),
            _ => None,
        }
    }

    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Schedule => "schedule",
            Self::S3 => "s3",
            Self::CloudwatchLog => "cloudwatchLog",
            Self::Sqs => "sqs",
        }
    }

    /// The route namespace every trigger of this kind is mounted under.
    pub fn route_prefix(&self) -> &'static str {
        match self {
            Self::Http => "/http",
            Self::Schedule => "/schedule",
            Self::S3 => "/s3",
            Self::CloudwatchLog => "/cloudwatch-logs",
            Self::Sqs => "/sqs",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Http => "HTTP",
            Self::Schedule => "Schedule",
            Self::S3 => "S3",
            Self::CloudwatchLog => "CloudWatchLog",
            Self::Sqs => "SQS",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Response modes
// ---------------------------------------------------------------------------

/// How a successful outcome value becomes an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ResponseMode {
    /// Return the value as the response body with status 200.
    Echo,
    /// Read `statusCode`, `headers`, `body` and `isBase64Encoded` from the value.
    StatusCodeBody,
    /// Ignore the value and return 204.
    FixedAcknowledge,
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// One compiled trigger bound to its owning function.
///
/// Immutable after compilation. `method`/`path` may be absent when the
/// trigger config did not carry enough to route on; the dispatcher skips
/// such descriptors with a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDescriptor {
    pub kind: TriggerKind,
    pub owner_name: String,
    /// Upper-case HTTP method, or `ANY`.
    pub method: Option<String>,
    /// Full route, including the kind prefix, in `{param}` form.
    pub path: Option<String>,
    /// Kind-specific source identity: queue ARN, bucket, log group or
    /// schedule expression.
    pub identity: Option<String>,
    pub response_mode: ResponseMode,
    pub cors_enabled: bool,
    /// Whether the route also accepts `POST` with an arbitrary payload.
    pub passthrough_post: bool,
    /// The trigger config exactly as written in the service definition.
    pub raw_config: Value,
}

impl TriggerDescriptor {
    /// `"<METHOD> <path>"`, when both parts are known.
    pub fn route_key(&self) -> Option<String> {
        match (&self.method, &self.path) {
            (Some(method), Some(path)) => Some(format!("{method} {path}")),
            _ => None,
        }
    }

    /// A string field of the raw config, if present.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.raw_config.get(key).and_then(Value::as_str)
    }
}

impl fmt::Display for TriggerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.route_key() {
            Some(route) => write!(f, "{}: {}", self.kind, route),
            None => write!(f, "{}: <unrouted>", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(method: Option<&str>, path: Option<&str>) -> TriggerDescriptor {
        TriggerDescriptor {
            kind: TriggerKind::Http,
            owner_name: "hello".into(),
            method: method.map(String::from),
            path: path.map(String::from),
            identity: None,
            response_mode: ResponseMode::StatusCodeBody,
            cors_enabled: false,
            passthrough_post: false,
            raw_config: json!({"method": "get"}),
        }
    }

    #[test]
    fn test_route_key_requires_method_and_path() {
        assert_eq!(
            descriptor(Some("GET"), Some("/http/hello")).route_key().as_deref(),
            Some("GET /http/hello")
        );
        assert!(descriptor(None, Some("/http/hello")).route_key().is_none());
        assert!(descriptor(Some("GET"), None).route_key().is_none());
    }

    #[test]
    fn test_display() {
        let d = descriptor(Some("GET"), Some("/http/hello"));
        assert_eq!(d.to_string(), "HTTP: GET /http/hello");
        assert_eq!(descriptor(None, None).to_string(), "HTTP: <unrouted>");
    }

    #[test]
    fn test_kind_from_config_key() {
        assert_eq!(TriggerKind::from_config_key("cloudwatchLog"), Some(TriggerKind::CloudwatchLog));
        assert_eq!(TriggerKind::from_config_key("websocket"), None);
        assert_eq!(TriggerKind::Sqs.route_prefix(), "/sqs");
    }
}
