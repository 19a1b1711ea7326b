//! CloudWatch Logs subscription triggers.

use serde_json::Value;

use super::super::errors::TriggerError;
use super::super::types::{Stimulus, TriggerDescriptor, TriggerKind};
use super::{events, passthrough_body, required_str, shorthand, slug_path, slug_segment};
use super::{CompileContext, CompiledRoute};

pub(super) fn compile(
    config: &Value,
    context: &CompileContext<'_>,
) -> Result<CompiledRoute, TriggerError> {
    let config = shorthand(config, "logGroup");
    let log_group = required_str(&config, "logGroup", TriggerKind::CloudwatchLog)?;
    let trimmed = log_group.strip_prefix('/').unwrap_or(log_group);

    Ok(CompiledRoute {
        method: Some("GET".into()),
        path: Some(format!(
            "{}/{}/{}",
            TriggerKind::CloudwatchLog.route_prefix(),
            slug_segment(context.function_name),
            slug_path(trimmed)
        )),
        identity: Some(log_group.to_string()),
        cors_enabled: false,
        passthrough_post: true,
    })
}

pub(super) fn synthesize(_descriptor: &TriggerDescriptor, stimulus: &Stimulus) -> Value {
    if let Stimulus::Http(request) = stimulus {
        if let Some(body) = passthrough_body(request) {
            return body;
        }
    }
    events::cloudwatch_logs_event()
}
