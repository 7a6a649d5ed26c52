//! Owns the scheduler tasks and their shared shutdown signal.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use tidewatch_store::TrackerStore;

use crate::adapter::PlatformAdapter;
use crate::notify::NotificationSink;
use crate::scheduler::Scheduler;
use crate::tracker::TrackerService;

pub struct TrackerRuntime {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl TrackerRuntime {
    /// Spawn one scheduler per adapter. A second adapter for an already
    /// scheduled platform is ignored.
    pub fn launch<S, N>(service: Arc<TrackerService<S, N>>, adapters: Vec<Arc<dyn PlatformAdapter>>) -> Self
    where
        S: TrackerStore + 'static,
        N: NotificationSink + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let mut scheduled = HashSet::new();

        for adapter in adapters {
            let platform = adapter.platform();
            if !scheduled.insert(platform) {
                warn!(platform = %platform, "Duplicate adapter ignored");
                continue;
            }
            let scheduler = Scheduler::new(service.clone(), adapter);
            let rx = rx.clone();
            tasks.spawn(async move { scheduler.run(rx).await });
        }

        info!(schedulers = scheduled.len(), "Tracker runtime started");
        Self { shutdown, tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// A receiver that flips to `true` when shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal every scheduler and wait for them to finish their current
    /// resource. Locks are released as each task unwinds.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Tracker runtime stopped");
    }
}
