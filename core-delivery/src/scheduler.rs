//! # Daily Scheduler
//!
//! Fires the delivery pipeline on a cron trigger evaluated in an IANA
//! timezone. Shutdown is only observed between runs: a run that has started
//! always completes.

use crate::error::{DeliveryError, Result};
use crate::orchestrator::{DeliveryPipeline, RunOutcome};
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use core_runtime::config::ScheduleSettings;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Recurring point in time: a six-field cron expression in a timezone
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    expression: String,
    schedule: cron::Schedule,
    timezone: Tz,
}

impl DailyTrigger {
    pub fn new(expression: &str, timezone: Tz) -> Result<Self> {
        let schedule =
            cron::Schedule::from_str(expression).map_err(|e| DeliveryError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            timezone,
        })
    }

    pub fn from_settings(settings: &ScheduleSettings) -> Result<Self> {
        Self::new(&settings.expression, settings.timezone)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First fire strictly after `after`
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Drives a [`DeliveryPipeline`] from a [`DailyTrigger`]
pub struct DailyScheduler {
    trigger: DailyTrigger,
    pipeline: Arc<DeliveryPipeline>,
    run_on_start: bool,
    clock: Arc<dyn Clock>,
}

impl DailyScheduler {
    pub fn new(trigger: DailyTrigger, pipeline: Arc<DeliveryPipeline>) -> Self {
        Self {
            trigger,
            pipeline,
            run_on_start: false,
            clock: Arc::new(SystemClock),
        }
    }

    /// Make one attempt as soon as the session is ready, before the first
    /// scheduled fire
    pub fn with_run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn trigger(&self) -> &DailyTrigger {
        &self.trigger
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            schedule = %self.trigger.expression(),
            timezone = %self.trigger.timezone(),
            run_on_start = self.run_on_start,
            "Scheduler started"
        );

        if self.run_on_start {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested before the session became ready");
                    return Ok(());
                }
                _ = self.pipeline.session().wait_ready() => {
                    info!("Running immediate delivery attempt");
                    log_outcome(&self.pipeline.run_once().await);
                }
            }
        }

        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            let now = self.clock.now();
            // The sleep runs on the monotonic clock; a lagging wall clock
            // must not make the fire just served come up again
            let from = last_fire.map_or(now, |fired| fired.max(now));
            let Some(next) = self.trigger.next_fire_after(from) else {
                warn!("Schedule has no future fire times, stopping");
                return Ok(());
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(
                next_fire = %next.with_timezone(&self.trigger.timezone()),
                wait_secs = wait.as_secs(),
                "Waiting for next scheduled run"
            );

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {
                    debug!("Trigger fired");
                    // Not raced against shutdown: an in-flight run completes
                    log_outcome(&self.pipeline.run_once().await);
                    last_fire = Some(next);
                }
            }
        }
    }
}

fn log_outcome(outcome: &RunOutcome) {
    info!(stage = outcome.stage(), outcome = %outcome, "Delivery run finished");
}
