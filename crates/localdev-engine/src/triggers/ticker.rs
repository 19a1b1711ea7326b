//! Background schedule ticker.
//!
//! Fires a schedule trigger's handler on its cadence, with the same payload
//! a bare poke of the route would produce. Only started when schedule
//! auto-fire is enabled.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::sync::broadcast;

use super::super::errors::TriggerError;
use super::super::invoke::InvocationAdapter;
use super::super::types::{FunctionRecord, InvocationOutcome, Stimulus, TriggerDescriptor};
use super::cron_describe::CronFields;
use super::schedule_trigger::call_argument;
use super::synthesize;

/// When a schedule fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    Every(Duration),
    Cron(Box<Schedule>),
}

impl Cadence {
    /// Parse `rate(N unit)` or a six-field `cron(...)` expression.
    pub fn parse(expression: &str) -> Result<Self, TriggerError> {
        if let Some(inner) = call_argument(expression, "rate") {
            return parse_rate(inner).map(Self::Every);
        }
        if let Some(inner) = call_argument(expression, "cron") {
            let normalized = CronFields::parse(inner)?.to_seven_field();
            let schedule = Schedule::from_str(&normalized).map_err(|e| TriggerError::Config {
                message: format!("invalid cron expression '{inner}': {e}"),
            })?;
            return Ok(Self::Cron(Box::new(schedule)));
        }
        Err(TriggerError::config(format!(
            "unsupported schedule expression '{expression}'"
        )))
    }

    fn next_delay(&self) -> Result<Duration, TriggerError> {
        match self {
            Self::Every(period) => Ok(*period),
            Self::Cron(schedule) => {
                let now = Utc::now();
                let next = schedule
                    .upcoming(Utc)
                    .next()
                    .ok_or_else(|| TriggerError::Runtime {
                        message: "cron schedule has no upcoming occurrences".into(),
                    })?;
                Ok((next - now)
                    .to_std()
                    .unwrap_or(Duration::from_millis(100)))
            }
        }
    }
}

fn parse_rate(inner: &str) -> Result<Duration, TriggerError> {
    let invalid = || TriggerError::config(format!("invalid rate expression '{inner}'"));
    let mut parts = inner.split_whitespace();
    let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let amount: u64 = amount.parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }
    let unit_secs = match unit {
        "minute" | "minutes" => 60,
        "hour" | "hours" => 3_600,
        "day" | "days" => 86_400,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(amount * unit_secs))
}

/// Fires one schedule trigger until shutdown.
#[derive(Clone)]
pub struct ScheduleTicker {
    record: Arc<FunctionRecord>,
    descriptor: Arc<TriggerDescriptor>,
    adapter: Arc<InvocationAdapter>,
}

impl ScheduleTicker {
    pub fn new(
        record: Arc<FunctionRecord>,
        descriptor: TriggerDescriptor,
        adapter: Arc<InvocationAdapter>,
    ) -> Self {
        Self {
            record,
            descriptor: Arc::new(descriptor),
            adapter,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.record.name
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), TriggerError> {
        let expression = self.descriptor.identity.as_deref().unwrap_or_default();
        let cadence = Cadence::parse(expression)?;
        tracing::info!(function = %self.record.name, schedule = %expression, "schedule ticker started");

        loop {
            let delay = cadence.next_delay()?;
            tokio::select! {
                _ = tokio::time::sleep(delay) => self.fire(expression).await,
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }

    async fn fire(&self, expression: &str) {
        let payload = synthesize(&self.descriptor, &Stimulus::Tick);
        tracing::info!(function = %self.record.name, schedule = %expression, "schedule fired");
        match self.adapter.invoke(&self.record, payload).await {
            InvocationOutcome::Success(_) => {
                tracing::info!(function = %self.record.name, "Success");
            }
            InvocationOutcome::Failure(e) => {
                tracing::warn!(function = %self.record.name, "Failure: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::super::{compile, CompileOptions};
    use super::*;
    use crate::errors::HandlerError;
    use crate::handlers::HandlerRegistry;
    use crate::invoke::{EnvironmentLayers, InvocationContext};
    use crate::traits::AsyncHandler;
    use crate::types::HandlerRef;

    #[test]
    fn test_parse_rate() {
        assert!(matches!(
            Cadence::parse("rate(5 minutes)").expect("valid"),
            Cadence::Every(d) if d == Duration::from_secs(300)
        ));
        assert!(matches!(
            Cadence::parse("rate(1 day)").expect("valid"),
            Cadence::Every(d) if d == Duration::from_secs(86_400)
        ));
        assert!(Cadence::parse("rate(0 minutes)").is_err());
        assert!(Cadence::parse("rate(5 fortnights)").is_err());
        assert!(Cadence::parse("rate(minutes)").is_err());
    }

    #[test]
    fn test_parse_cron() {
        assert!(matches!(
            Cadence::parse("cron(0/5 8-17 ? * MON-FRI *)").expect("valid"),
            Cadence::Cron(_)
        ));
        assert!(Cadence::parse("cron(0 10 * *)").is_err());
    }

    fn ticker(expression: &str, tx: mpsc::UnboundedSender<Value>) -> ScheduleTicker {
        let descriptor = compile(
            "tick",
            &[json!({"schedule": {"rate": expression, "input": {"from": "ticker"}}})],
            &CompileOptions::default(),
        )
        .expect("compiles")
        .remove(0);
        let registry = HandlerRegistry::new().register(
            "index.tick",
            AsyncHandler(move |event: Value, _ctx: InvocationContext| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                    Ok::<_, HandlerError>(Value::Null)
                }
            }),
        );
        let adapter = Arc::new(InvocationAdapter::new(
            Arc::new(registry),
            EnvironmentLayers::with_baseline(BTreeMap::new(), None),
        ));
        let record = Arc::new(FunctionRecord {
            name: "tick".into(),
            handler: HandlerRef {
                module: "index".into(),
                entry: "tick".into(),
            },
            environment: BTreeMap::new(),
            triggers: vec![descriptor.clone()],
        });
        ScheduleTicker::new(record, descriptor, adapter)
    }

    #[tokio::test]
    async fn test_ticker_fires_with_fixed_input() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let ticker = ticker("rate(1 minute)", tx);
        let handle = tokio::spawn(async move { ticker.run(shutdown_rx).await });
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("should not timeout")
            .expect("should receive event");
        assert_eq!(event, json!({"from": "ticker"}));

        shutdown_tx.send(()).expect("send shutdown");
        handle.await.expect("task completes").expect("no error");
    }

    #[tokio::test]
    async fn test_ticker_shutdown_before_first_tick() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let ticker = ticker("rate(1 hour)", tx);
        let handle = tokio::spawn(async move { ticker.run(shutdown_rx).await });
        tokio::task::yield_now().await;

        shutdown_tx.send(()).expect("send shutdown");
        assert!(handle.await.expect("task completes").is_ok());
        assert!(rx.try_recv().is_err());
    }
}
