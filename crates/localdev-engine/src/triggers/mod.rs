//! Trigger compilation and payload synthesis.
//!
//! Each trigger kind contributes a `compile` function (config to route) and
//! a `synthesize` function (stimulus to handler event). The per-kind table
//! in [`behavior`] is the only place kinds are enumerated; the dispatcher,
//! ticker and queue consumer all go through it. The [`TriggerRunner`] owns
//! the background tasks (schedule tickers and queue consumers).

mod cloudwatch_log_trigger;
pub mod cron_describe;
pub mod events;
mod http_trigger;
mod runner;
mod s3_trigger;
mod schedule_trigger;
mod sqs_trigger;
mod ticker;

pub use http_trigger::http_route_path;
pub use runner::{RunningFlag, TriggerRunner};
pub use schedule_trigger::render_schedule_route;
pub use sqs_trigger::{batch_size, queue_name_from_identity, DEFAULT_BATCH_SIZE};
pub use ticker::{Cadence, ScheduleTicker};

use std::collections::HashMap;

use chrono::{FixedOffset, Offset, Utc};
use serde_json::{json, Value};

use super::errors::TriggerError;
use super::types::{HttpStimulus, ResponseMode, Stimulus, TriggerDescriptor, TriggerKind};

// ---------------------------------------------------------------------------
// Compile options
// ---------------------------------------------------------------------------

/// Service-wide settings that affect how triggers compile.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Prefix applied to every http trigger path (custom domain base path).
    pub base_path: Option<String>,
    /// Render cron route names in local time instead of UTC.
    pub show_local_time: bool,
    /// Offset used when `show_local_time` is set.
    pub utc_offset: FixedOffset,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            base_path: None,
            show_local_time: false,
            utc_offset: Utc.fix(),
        }
    }
}

impl CompileOptions {
    /// The host's current offset from UTC.
    pub fn host_offset() -> FixedOffset {
        *chrono::Local::now().offset()
    }
}

pub(crate) struct CompileContext<'a> {
    pub function_name: &'a str,
    pub options: &'a CompileOptions,
}

/// The kind-specific part of a descriptor.
#[derive(Debug, Default)]
pub(crate) struct CompiledRoute {
    pub method: Option<String>,
    pub path: Option<String>,
    pub identity: Option<String>,
    pub cors_enabled: bool,
    pub passthrough_post: bool,
}

// ---------------------------------------------------------------------------
// Per-kind behavior table
// ---------------------------------------------------------------------------

type CompileFn = fn(&Value, &CompileContext<'_>) -> Result<CompiledRoute, TriggerError>;
type SynthesizeFn = fn(&TriggerDescriptor, &Stimulus) -> Value;

pub(crate) struct KindBehavior {
    pub response_mode: ResponseMode,
    pub compile: CompileFn,
    pub synthesize: SynthesizeFn,
}

pub(crate) fn behavior(kind: TriggerKind) -> KindBehavior {
    match kind {
        TriggerKind::Http => KindBehavior {
            response_mode: ResponseMode::StatusCodeBody,
            compile: http_trigger::compile,
            synthesize: http_trigger::synthesize,
        },
        TriggerKind::Schedule => KindBehavior {
            response_mode: ResponseMode::Echo,
            compile: schedule_trigger::compile,
            synthesize: schedule_trigger::synthesize,
        },
        TriggerKind::S3 => KindBehavior {
            response_mode: ResponseMode::Echo,
            compile: s3_trigger::compile,
            synthesize: s3_trigger::synthesize,
        },
        TriggerKind::CloudwatchLog => KindBehavior {
            response_mode: ResponseMode::Echo,
            compile: cloudwatch_log_trigger::compile,
            synthesize: cloudwatch_log_trigger::synthesize,
        },
        TriggerKind::Sqs => KindBehavior {
            response_mode: ResponseMode::FixedAcknowledge,
            compile: sqs_trigger::compile,
            synthesize: sqs_trigger::synthesize,
        },
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compile one function's trigger list into descriptors.
///
/// Each entry is either a bare kind name or a mapping from kind name to
/// config. Keys beside the one supported kind are ignored with a warning;
/// entries naming several kinds, unsupported kinds and malformed entries are
/// dropped.
/// Synthesized routes that collide within the function get `-2`, `-3`, ...
/// appended.
pub fn compile(
    function_name: &str,
    triggers: &[Value],
    options: &CompileOptions,
) -> Result<Vec<TriggerDescriptor>, TriggerError> {
    let context = CompileContext {
        function_name,
        options,
    };
    let mut descriptors = Vec::new();
    let mut seen: HashMap<(TriggerKind, String), usize> = HashMap::new();

    for entry in triggers {
        let (key, config) = match entry {
            Value::String(key) => (key.as_str(), Value::Null),
            Value::Object(map) => {
                let mut kinds = map
                    .iter()
                    .filter(|(key, _)| TriggerKind::from_config_key(key).is_some());
                match (kinds.next(), kinds.next()) {
                    (Some((key, config)), None) => {
                        if map.len() > 1 {
                            tracing::warn!(function = %function_name, kind = %key, "ignoring extra keys in trigger entry");
                        }
                        (key.as_str(), config.clone())
                    }
                    (Some(_), Some(_)) => {
                        tracing::warn!(function = %function_name, "trigger entry names more than one kind, ignoring it");
                        continue;
                    }
                    (None, _) => match map.iter().next() {
                        Some((key, config)) => (key.as_str(), config.clone()),
                        None => continue,
                    },
                }
            }
            _ => {
                tracing::debug!(function = %function_name, "ignoring malformed trigger entry");
                continue;
            }
        };
        let Some(kind) = TriggerKind::from_config_key(key) else {
            tracing::debug!(function = %function_name, kind = %key, "ignoring unsupported trigger kind");
            continue;
        };

        let behavior = behavior(kind);
        let mut route = (behavior.compile)(&config, &context)?;

        if kind != TriggerKind::Http {
            if let Some(path) = route.path.take() {
                let count = seen.entry((kind, path.clone())).or_insert(0);
                *count += 1;
                route.path = Some(match *count {
                    1 => path,
                    n => format!("{path}-{n}"),
                });
            }
        }

        descriptors.push(TriggerDescriptor {
            kind,
            owner_name: function_name.to_string(),
            method: route.method,
            path: route.path,
            identity: route.identity,
            response_mode: behavior.response_mode,
            cors_enabled: route.cors_enabled,
            passthrough_post: route.passthrough_post,
            raw_config: config,
        });
    }

    Ok(descriptors)
}

/// Build the handler event for `stimulus` arriving on `descriptor`.
pub fn synthesize(descriptor: &TriggerDescriptor, stimulus: &Stimulus) -> Value {
    (behavior(descriptor.kind).synthesize)(descriptor, stimulus)
}

/// Whether the trigger config opts out with `enabled: false`.
pub fn is_enabled(descriptor: &TriggerDescriptor) -> bool {
    descriptor.raw_config.get("enabled").map(loose_bool).unwrap_or(true)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Expand a bare string config to `{ key: value }`.
pub(crate) fn shorthand(config: &Value, key: &str) -> Value {
    match config {
        Value::String(s) => json!({ key: s }),
        other => other.clone(),
    }
}

/// `true`, `"true"` and non-zero numbers are truthy; anything else is not.
pub(crate) fn loose_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Replace characters that would be read as route syntax or query markers.
pub(crate) fn slug_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '{' | '}' | '*' | '?' | '#' | '%' => '-',
            c if c.is_whitespace() => '-',
            c => c,
        })
        .collect()
}

/// [`slug_segment`] applied to each `/`-separated segment.
pub(crate) fn slug_path(path: &str) -> String {
    path.split('/').map(slug_segment).collect::<Vec<_>>().join("/")
}

/// A POST body sent to a trigger route, used verbatim as the event.
///
/// JSON bodies are parsed; anything else is passed as a string. Returns
/// `None` for non-POST requests and empty bodies.
pub(crate) fn passthrough_body(request: &HttpStimulus) -> Option<Value> {
    if !request.method.eq_ignore_ascii_case("POST") || request.body.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(&request.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&request.body).into_owned())),
    )
}

/// The required string identity field of a trigger config.
pub(crate) fn required_str<'a>(
    config: &'a Value,
    key: &str,
    kind: TriggerKind,
) -> Result<&'a str, TriggerError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            TriggerError::config(format!("{} trigger requires a '{key}' string", kind.config_key()))
        })
}
