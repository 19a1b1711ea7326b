//! HTTP triggers.
//!
//! Config is either `"METHOD path"` or `{ method, path, cors }`. Paths are
//! mounted under `/http`, with `{name}`, `:name` and `{name+}` segments
//! turned into route parameters.

use std::borrow::Cow;

use serde_json::{json, Value};

use super::super::errors::TriggerError;
use super::super::types::{HttpStimulus, Stimulus, TriggerDescriptor, TriggerKind};
use super::{CompileContext, CompiledRoute};

pub(super) fn compile(
    config: &Value,
    context: &CompileContext<'_>,
) -> Result<CompiledRoute, TriggerError> {
    let (method, path, cors_enabled) = match config {
        Value::Null => (None, None, false),
        Value::String(shorthand) => {
            let mut parts = shorthand.split_whitespace();
            (
                parts.next().map(str::to_string),
                parts.next().map(str::to_string),
                false,
            )
        }
        Value::Object(map) => (
            map.get("method").and_then(Value::as_str).map(str::to_string),
            map.get("path").and_then(Value::as_str).map(str::to_string),
            map.get("cors").is_some_and(cors_flag),
        ),
        _ => {
            return Err(TriggerError::config(
                "http trigger must be a \"METHOD path\" string or a mapping",
            ))
        }
    };

    Ok(CompiledRoute {
        method: method.map(|m| normalize_method(&m)),
        path: path.map(|p| http_route_path(&p, context.options.base_path.as_deref())),
        identity: None,
        cors_enabled,
        passthrough_post: false,
    })
}

fn normalize_method(method: &str) -> String {
    match method.to_ascii_uppercase().as_str() {
        "*" => "ANY".to_string(),
        upper => upper.to_string(),
    }
}

/// `cors: true`, `cors: "true"` and any cors mapping enable CORS.
fn cors_flag(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        other => super::loose_bool(other),
    }
}

/// Build the dispatcher route for a declared http path.
pub fn http_route_path(path: &str, base_path: Option<&str>) -> String {
    let joined = match base_path.map(|b| b.trim_matches('/')).filter(|b| !b.is_empty()) {
        Some(base) => format!("{base}/{}", path.trim_start_matches('/')),
        None => path.to_string(),
    };
    let segments: Vec<String> = joined
        .split('/')
        .filter(|s| !s.is_empty())
        .map(route_segment)
        .collect();
    if segments.is_empty() {
        TriggerKind::Http.route_prefix().to_string()
    } else {
        format!("{}/{}", TriggerKind::Http.route_prefix(), segments.join("/"))
    }
}

fn route_segment(segment: &str) -> String {
    if let Some(name) = segment.strip_prefix(':') {
        return format!("{{{name}}}");
    }
    if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        return match inner.strip_suffix('+') {
            Some(name) => format!("{{*{name}}}"),
            None => format!("{{{inner}}}"),
        };
    }
    segment.to_string()
}

pub(super) fn synthesize(descriptor: &TriggerDescriptor, stimulus: &Stimulus) -> Value {
    let request = match stimulus {
        Stimulus::Http(request) => Cow::Borrowed(request),
        _ => Cow::Owned(HttpStimulus {
            method: descriptor.method.clone().unwrap_or_else(|| "GET".into()),
            path: descriptor.path.clone().unwrap_or_default(),
            ..Default::default()
        }),
    };

    json!({
        "resource": descriptor.path,
        "path": request.path,
        "httpMethod": request.method,
        "headers": request.headers,
        "queryStringParameters": request.query,
        "pathParameters": request.path_params,
        "body": request.body_text(),
        "isBase64Encoded": false,
        "requestContext": {
            "stage": "local",
            "httpMethod": request.method,
            "path": request.path,
            "resourcePath": descriptor.path,
        },
    })
}
