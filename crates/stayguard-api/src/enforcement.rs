//! # Periodic Enforcement Runner
//!
//! Background task that wakes every `ENFORCEMENT_TICK_SECS`, asks the
//! configured [`CronSchedule`] whether its slot is due, and if so runs one
//! Dead Man's Switch pass through [`LifecycleService::run_enforcement`].
//!
//! The schedule catches up after downtime: a process that was stopped at
//! the slot boundary runs once when it comes back. Overlapping or repeated
//! passes are harmless since each `(stay, threshold)` fires at most once.

use std::future::Future;
use std::time::Duration;

use stayguard_agentic::CronSchedule;

use crate::service::{EnforcementReport, LifecycleService, ServiceResult};

pub struct EnforcementRunner {
    service: LifecycleService,
    schedule: CronSchedule,
    tick: Duration,
}

impl EnforcementRunner {
    pub fn new(service: LifecycleService, schedule: CronSchedule, tick: Duration) -> Self {
        Self {
            service,
            schedule,
            tick,
        }
    }

    /// Run a pass if the schedule is due at the service clock's now.
    ///
    /// Returns `Ok(None)` when nothing was due. A failed pass does not mark
    /// the slot as fired, so the next tick retries it.
    pub async fn tick_once(&mut self) -> ServiceResult<Option<EnforcementReport>> {
        let now = self.service.now();
        if !self.schedule.should_fire(*now.as_datetime()) {
            return Ok(None);
        }
        let report = self.service.run_enforcement(now).await?;
        self.schedule.mark_fired(*now.as_datetime());
        Ok(Some(report))
    }

    /// Tick until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tracing::info!(
            schedule = %self.schedule.schedule_id,
            pattern = ?self.schedule.pattern,
            tick_secs = self.tick.as_secs(),
            "enforcement runner started"
        );
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("enforcement runner stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once().await {
                        tracing::error!(schedule = %self.schedule.schedule_id, "enforcement pass failed: {e}");
                    }
                }
            }
        }
    }
}
