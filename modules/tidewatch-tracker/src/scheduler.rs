//! One polling loop per platform.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tidewatch_common::{Platform, TrackedResource, TrackerError};
use tidewatch_store::TrackerStore;

use crate::adapter::PlatformAdapter;
use crate::cooldown::CooldownController;
use crate::dispatcher::DispatchReport;
use crate::notify::NotificationSink;
use crate::tracker::TrackerService;

/// Outcome of one pass over a platform's resources.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub resources: usize,
    pub processed: usize,
    pub failed: usize,
    pub not_found: usize,
    /// Left for the next cycle because of a rate limit or shutdown.
    pub deferred: usize,
    pub rate_limited: bool,
    pub delivered: DispatchReport,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resources={} processed={} failed={} not_found={} deferred={} created={} edited={} retired={}",
            self.resources,
            self.processed,
            self.failed,
            self.not_found,
            self.deferred,
            self.delivered.created,
            self.delivered.edited,
            self.delivered.retired,
        )
    }
}

pub struct Scheduler<S, N> {
    service: Arc<TrackerService<S, N>>,
    adapter: Arc<dyn PlatformAdapter>,
    cooldown: CooldownController,
}

impl<S, N> Scheduler<S, N>
where
    S: TrackerStore,
    N: NotificationSink,
{
    pub fn new(service: Arc<TrackerService<S, N>>, adapter: Arc<dyn PlatformAdapter>) -> Self {
        let cooldown = CooldownController::new(adapter.cooldown());
        Self {
            service,
            adapter,
            cooldown,
        }
    }

    pub fn platform(&self) -> Platform {
        self.adapter.platform()
    }

    pub fn cooldown(&self) -> &CooldownController {
        &self.cooldown
    }

    /// Run cycles until `shutdown` turns true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let platform = self.platform();
        info!(platform = %platform, "Scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();

            match self.run_cycle(&shutdown).await {
                Ok(report) => info!(platform = %platform, "Cycle complete. {report}"),
                Err(e) => warn!(platform = %platform, error = %e, "Cycle aborted"),
            }

            let delay = self.cooldown.remaining_cycle_delay(started.elapsed());
            if delay.is_zero() {
                continue;
            }
            debug!(platform = %platform, delay_ms = delay.as_millis() as u64, "Waiting for next cycle");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(platform = %platform, "Scheduler stopped");
    }

    /// One pass over every tracked resource of the platform, in list order.
    ///
    /// A single resource failing never ends the cycle. A rate limit defers
    /// the rest of the cycle. A store failure ends it.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<CycleReport, TrackerError> {
        let resources = self
            .service
            .store()
            .list_resources(self.platform())
            .await?;

        let mut report = CycleReport {
            resources: resources.len(),
            ..CycleReport::default()
        };
        let width = self.adapter.max_concurrency().max(1);

        for chunk in resources.chunks(width) {
            if report.rate_limited || *shutdown.borrow() {
                report.deferred += chunk.len();
                continue;
            }

            let results = join_all(chunk.iter().map(|resource| self.process(resource))).await;
            for (resource, result) in chunk.iter().zip(results) {
                match result {
                    Ok(delivered) => {
                        report.processed += 1;
                        report.delivered.merge(delivered);
                    }
                    Err(TrackerError::RateLimited { .. }) => {
                        report.rate_limited = true;
                        report.deferred += 1;
                    }
                    Err(TrackerError::NotFound(_)) => report.not_found += 1,
                    Err(e @ TrackerError::Persistence(_)) => return Err(e),
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            platform = %resource.platform,
                            resource = %resource.external_id,
                            error = %e,
                            "Resource skipped this cycle"
                        );
                    }
                }
            }
        }

        if report.rate_limited {
            if let Some(wait) = self.cooldown.blocked_for(Instant::now()) {
                info!(platform = %self.platform(), wait_secs = wait.as_secs(), deferred = report.deferred, "Deferring rest of cycle after rate limit");
            }
        }
        Ok(report)
    }

    async fn process(&self, resource: &TrackedResource) -> Result<DispatchReport, TrackerError> {
        self.service
            .poll(self.adapter.as_ref(), &self.cooldown, resource, Utc::now())
            .await
    }
}
