//! Scheduling orchestration
//!
//! Three duties run concurrently until a shared shutdown signal fires:
//! - the telemetry refresh loop, which keeps the power stores current
//! - the pod watch, which places pods as they become unscheduled
//! - the retry sweep, which periodically re-attempts every unscheduled pod
//!
//! Each duty publishes its [`DutyState`] on a watch channel.

mod placement;
mod refresh;
mod sweep;
mod watch;


pub use placement::{PlacementOutcome, Placer};
pub use refresh::{MetricRefresher, RefreshOutcome};
pub use sweep::{RetrySweep, SweepReport};
pub use watch::PodWatch;

use crate::cluster::ClusterApi;
use crate::health::HealthRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch as state_watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Lifecycle of one duty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyState {
    Running,
    Stopping,
    Stopped,
}

/// Publishes a duty's state transitions
#[derive(Clone)]
pub struct DutyReporter {
    tx: Arc<state_watch::Sender<DutyState>>,
}

impl DutyReporter {
    fn new() -> (Self, state_watch::Receiver<DutyState>) {
        let (tx, rx) = state_watch::channel(DutyState::Running);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn stopping(&self) {
        self.tx.send_replace(DutyState::Stopping);
    }

    fn stopped(&self) {
        self.tx.send_replace(DutyState::Stopped);
    }
}

/// Timing of the duties
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub refresh_interval: Duration,
    pub sweep_interval: Duration,
    pub settle_delay: Duration,
    pub resubscribe_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            resubscribe_backoff: Duration::from_secs(5),
        }
    }
}

/// Shortest period a ticking duty runs at
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub mod duties {
    pub const REFRESH: &str = "refresh";
    pub const WATCH: &str = "watch";
    pub const SWEEP: &str = "sweep";
}

struct Duty {
    name: &'static str,
    state: state_watch::Receiver<DutyState>,
    handle: JoinHandle<()>,
}

fn spawn_duty<F, Fut>(name: &'static str, run: F) -> Duty
where
    F: FnOnce(DutyReporter) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (reporter, state) = DutyReporter::new();
    let fut = run(reporter.clone());
    let handle = tokio::spawn(async move {
        fut.await;
        reporter.stopped();
    });
    Duty {
        name,
        state,
        handle,
    }
}

/// Owns the three duties before they start
pub struct Orchestrator {
    config: OrchestratorConfig,
    refresher: MetricRefresher,
    placer: Placer,
    cluster: Arc<dyn ClusterApi>,
    health: HealthRegistry,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        refresher: MetricRefresher,
        placer: Placer,
        cluster: Arc<dyn ClusterApi>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            config,
            refresher,
            placer,
            cluster,
            health,
        }
    }

    /// Spawn every duty, each subscribed to `shutdown`
    pub fn start(self, shutdown: &broadcast::Sender<()>) -> RunningDuties {
        let OrchestratorConfig {
            refresh_interval,
            sweep_interval,
            settle_delay,
            resubscribe_backoff,
        } = self.config;

        let watch = PodWatch::new(
            self.cluster.clone(),
            self.placer.clone(),
            self.health.clone(),
            settle_delay,
            resubscribe_backoff,
        );
        let sweep = RetrySweep::new(self.cluster, self.placer, self.health);
        let refresher = self.refresher;

        let refresh_rx = shutdown.subscribe();
        let watch_rx = shutdown.subscribe();
        let sweep_rx = shutdown.subscribe();

        let spawned = vec![
            spawn_duty(duties::REFRESH, move |state| {
                refresher.run(refresh_interval, refresh_rx, state)
            }),
            spawn_duty(duties::WATCH, move |state| watch.run(watch_rx, state)),
            spawn_duty(duties::SWEEP, move |state| {
                sweep.run(sweep_interval, sweep_rx, state)
            }),
        ];

        info!(duties = spawned.len(), "Scheduling duties started");
        RunningDuties { duties: spawned }
    }
}

/// Handles to the spawned duties
pub struct RunningDuties {
    duties: Vec<Duty>,
}

impl RunningDuties {
    /// Current state of every duty
    pub fn states(&self) -> Vec<(&'static str, DutyState)> {
        self.duties
            .iter()
            .map(|d| (d.name, *d.state.borrow()))
            .collect()
    }

    /// State channel of one duty
    pub fn state_of(&self, name: &str) -> Option<state_watch::Receiver<DutyState>> {
        self.duties
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.state.clone())
    }

    /// Wait for every duty to stop
    pub async fn join(self) -> Vec<(&'static str, DutyState)> {
        let mut finished = Vec::with_capacity(self.duties.len());

        for duty in self.duties {
            if let Err(e) = duty.handle.await {
                error!(duty = duty.name, error = %e, "Duty task failed");
            }
            let state = *duty.state.borrow();
            info!(duty = duty.name, state = ?state, "Duty joined");
            finished.push((duty.name, state));
        }

        finished
    }
}
