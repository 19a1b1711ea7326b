//! Schedule triggers.
//!
//! Config is a `rate(...)`/`cron(...)` expression or `{ rate, input, enabled }`.
//! The route name is a readable rendering of the expression, e.g.
//! `/schedule/report/cron-At-10:00-AM-UTC`.

use chrono::{FixedOffset, Utc};
use serde_json::Value;

use super::super::errors::TriggerError;
use super::super::types::{Stimulus, TriggerDescriptor, TriggerKind};
use super::cron_describe::{describe, CronFields};
use super::{events, passthrough_body, required_str, shorthand, slug_segment};
use super::{CompileContext, CompiledRoute};

pub(super) fn compile(
    config: &Value,
    context: &CompileContext<'_>,
) -> Result<CompiledRoute, TriggerError> {
    let config = shorthand(config, "rate");
    let expression = required_str(&config, "rate", TriggerKind::Schedule)?;
    let rendered = render_schedule_route(
        expression,
        context.options.show_local_time,
        context.options.utc_offset,
    )?;

    Ok(CompiledRoute {
        method: Some("GET".into()),
        path: Some(format!(
            "{}/{}/{}",
            TriggerKind::Schedule.route_prefix(),
            slug_segment(context.function_name),
            rendered
        )),
        identity: Some(expression.trim().to_string()),
        cors_enabled: false,
        passthrough_post: true,
    })
}

/// The argument of `name(...)`, if `expression` has that shape.
pub(crate) fn call_argument<'a>(expression: &'a str, name: &str) -> Option<&'a str> {
    expression
        .trim()
        .strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

/// Render a schedule expression as a route segment.
///
/// Cron expressions become their description plus a `UTC` or `LOCAL`
/// marker; rate expressions become `rate-<literal>`.
pub fn render_schedule_route(
    expression: &str,
    show_local_time: bool,
    utc_offset: FixedOffset,
) -> Result<String, TriggerError> {
    let phrase = if let Some(inner) = call_argument(expression, "cron") {
        let mut fields = CronFields::parse(inner)?;
        if show_local_time {
            fields = fields.shift_hours(utc_offset.local_minus_utc().div_euclid(3600));
        }
        let marker = if show_local_time { "LOCAL" } else { "UTC" };
        format!("cron-{} {marker}", describe(&fields))
    } else if let Some(inner) = call_argument(expression, "rate") {
        format!("rate-{inner}")
    } else {
        return Err(TriggerError::config(format!(
            "schedule expression must be rate(...) or cron(...): '{expression}'"
        )));
    };
    Ok(collapse(&phrase))
}

/// Drop the first comma, turn parentheses and whitespace runs into `-`,
/// then trim one trailing separator.
fn collapse(phrase: &str) -> String {
    let phrase = phrase.replacen(',', "", 1);
    let mut out = String::with_capacity(phrase.len());
    let mut in_space = false;
    for c in phrase.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        match c {
            '(' | ')' => out.push('-'),
            c => out.push_str(&slug_segment(&c.to_string())),
        }
    }
    if out.ends_with('-') || out.ends_with('/') {
        out.pop();
    }
    out
}

pub(super) fn synthesize(descriptor: &TriggerDescriptor, stimulus: &Stimulus) -> Value {
    if let Stimulus::Http(request) = stimulus {
        if let Some(body) = passthrough_body(request) {
            return body;
        }
    }
    match descriptor.raw_config.get("input") {
        Some(input) if !input.is_null() => input.clone(),
        _ => events::schedule_event(Utc::now()),
    }
}
