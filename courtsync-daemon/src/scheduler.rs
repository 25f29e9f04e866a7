//! Scheduler: decides *when* a sync cycle runs.
//!
//! Three tasks share one broadcast shutdown channel:
//!
//! - processor: the only caller of `run_cycle`; coalesces requests that
//!   piled up while a cycle ran and checks the enable gate before each one.
//! - ticker: requests an `Interval` cycle every period (first tick skipped).
//! - reachability: mirrors the probe into the orchestrator's online flag and
//!   requests a `Reconnected` cycle on every unreachable → reachable edge.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;

use courtsync_core::config::SyncSettings;
use courtsync_core::types::EntityKind;
use courtsync_sync::{CycleOutcome, SyncOrchestrator};

use crate::error::DaemonError;
use crate::runtime::handle_join;

/// Why a cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", content = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Interval,
    Reconnected,
    Foreground,
    Realtime(EntityKind),
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval => write!(f, "interval"),
            Trigger::Reconnected => write!(f, "reconnected"),
            Trigger::Foreground => write!(f, "foreground"),
            Trigger::Realtime(kind) => write!(f, "realtime:{}", kind.table_name()),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub trigger: String,
    /// Requests answered by this one cycle.
    pub coalesced: usize,
    pub outcome: CycleOutcome,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(courtsync_core::config::DEFAULT_INTERVAL_SECS),
        }
    }
}

impl From<&SyncSettings> for SchedulerOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            interval: settings.interval(),
        }
    }
}

pub(crate) struct SyncJob {
    trigger: Trigger,
    respond_to: Option<oneshot::Sender<CycleSummary>>,
}

/// Cloneable front door to the processor task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SyncJob>,
    last: Arc<RwLock<Option<CycleSummary>>>,
}

impl SchedulerHandle {
    /// Request a cycle and wait for its summary.
    pub async fn trigger(&self, trigger: Trigger) -> Result<CycleSummary, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(SyncJob {
                trigger,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("sync response"))
    }

    /// Fire-and-forget. Returns `false` if the request was dropped because
    /// the queue is full (a cycle is already owed) or closed.
    pub fn request(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(SyncJob {
            trigger,
            respond_to: None,
        }) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(%trigger, error = %err, "cycle request dropped");
                false
            }
        }
    }

    pub async fn last_summary(&self) -> Option<CycleSummary> {
        self.last.read().await.clone()
    }
}

pub struct Scheduler {
    handle: SchedulerHandle,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<Result<(), DaemonError>>)>,
}

impl Scheduler {
    /// Start with a private shutdown channel.
    pub fn start(
        orchestrator: Arc<SyncOrchestrator>,
        options: SchedulerOptions,
        reachability: Option<watch::Receiver<bool>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self::start_with_shutdown(orchestrator, options, reachability, shutdown_tx)
    }

    /// Start on a shutdown channel shared with the rest of the runtime.
    pub fn start_with_shutdown(
        orchestrator: Arc<SyncOrchestrator>,
        options: SchedulerOptions,
        reachability: Option<watch::Receiver<bool>>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<SyncJob>(64);
        let handle = SchedulerHandle {
            tx,
            last: Arc::new(RwLock::new(None)),
        };
        let mut tasks = Vec::new();

        tasks.push(("sync_processor", {
            let orchestrator = orchestrator.clone();
            let last = handle.last.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(processor_task(orchestrator, rx, last, shutdown_rx))
        }));

        tasks.push(("interval_ticker", {
            let handle = handle.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(ticker_task(handle, options.interval, shutdown_rx))
        }));

        if let Some(reachability) = reachability {
            tasks.push(("reachability_watcher", {
                let handle = handle.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(reachability_task(
                    orchestrator,
                    handle,
                    reachability,
                    shutdown_rx,
                ))
            }));
        }

        tracing::info!(interval_secs = options.interval.as_secs(), "scheduler started");
        Self {
            handle,
            shutdown_tx,
            tasks,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Broadcast shutdown and wait for every task.
    pub async fn stop(self) -> Result<(), DaemonError> {
        let _ = self.shutdown_tx.send(());
        self.join().await
    }

    /// Wait for every task without signalling shutdown.
    pub async fn join(self) -> Result<(), DaemonError> {
        for (name, task) in self.tasks {
            handle_join(name, task.await)?;
        }
        Ok(())
    }
}

async fn processor_task(
    orchestrator: Arc<SyncOrchestrator>,
    mut rx: mpsc::Receiver<SyncJob>,
    last: Arc<RwLock<Option<CycleSummary>>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = rx.recv() => {
                let Some(first) = maybe_job else { break };
                let trigger = first.trigger;
                let mut jobs = vec![first];
                while let Ok(job) = rx.try_recv() {
                    jobs.push(job);
                }

                let outcome = if orchestrator.is_enabled() {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!(%trigger, "shutdown during cycle; abandoning");
                            break;
                        }
                        outcome = orchestrator.run_cycle() => outcome,
                    }
                } else {
                    tracing::debug!(%trigger, "sync disabled; trigger ignored");
                    CycleOutcome::Disabled
                };

                let summary = CycleSummary {
                    trigger: trigger.to_string(),
                    coalesced: jobs.len(),
                    outcome,
                    finished_at: Utc::now(),
                };
                tracing::debug!(
                    trigger = %summary.trigger,
                    coalesced = summary.coalesced,
                    success = summary.outcome.is_success(),
                    "cycle request handled",
                );
                *last.write().await = Some(summary.clone());
                for job in jobs {
                    if let Some(respond_to) = job.respond_to {
                        let _ = respond_to.send(summary.clone());
                    }
                }
            }
        }
    }
    Ok(())
}

async fn ticker_task(
    handle: SchedulerHandle,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                handle.request(Trigger::Interval);
            }
        }
    }
    Ok(())
}

async fn reachability_task(
    orchestrator: Arc<SyncOrchestrator>,
    handle: SchedulerHandle,
    mut reachability: watch::Receiver<bool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut online = *reachability.borrow_and_update();
    orchestrator.set_online(online);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            changed = reachability.changed() => {
                if changed.is_err() {
                    tracing::debug!("reachability source closed");
                    break;
                }
                let now = *reachability.borrow_and_update();
                orchestrator.set_online(now);
                if now && !online {
                    tracing::info!("remote reachable again; requesting cycle");
                    handle.request(Trigger::Reconnected);
                }
                online = now;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
impl SchedulerHandle {
    /// Handle wired to a bare channel, for exercising producers in isolation.
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<SyncJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                last: Arc::new(RwLock::new(None)),
            },
            rx,
        )
    }
}

#[cfg(test)]
pub(crate) fn job_trigger(job: &SyncJob) -> Trigger {
    job.trigger
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtsync_core::entity::Team;
    use courtsync_sync::gateway::GatewayCalls;
    use courtsync_sync::{LocalStore, MemoryGateway, MemoryStore, PendingOperationQueue};

    fn engine() -> (Arc<MemoryGateway>, Arc<SyncOrchestrator>) {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(Team::new("Hawks", "U14", "Reyes").into())
            .unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store,
            gateway.clone(),
            Arc::new(PendingOperationQueue::in_memory()),
        ));
        (gateway, orchestrator)
    }

    fn hourly() -> SchedulerOptions {
        SchedulerOptions {
            interval: Duration::from_secs(3_600),
        }
    }

    fn cycles(gateway: &MemoryGateway) -> usize {
        gateway.calls().fetch_all / EntityKind::all().len()
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_returns_summary() {
        let (gateway, orchestrator) = engine();
        let scheduler = Scheduler::start(orchestrator, hourly(), None);

        let summary = scheduler.handle().trigger(Trigger::Manual).await.unwrap();

        assert_eq!(summary.trigger, "manual");
        assert_eq!(summary.coalesced, 1);
        assert!(summary.outcome.is_success());
        assert_eq!(summary.outcome.result().unwrap().pushed, 1);
        assert_eq!(scheduler.handle().last_summary().await, Some(summary));
        assert_eq!(gateway.len(), 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_gate_blocks_every_trigger() {
        let (gateway, orchestrator) = engine();
        orchestrator.set_enabled(false);
        let scheduler = Scheduler::start(
            orchestrator,
            SchedulerOptions {
                interval: Duration::from_secs(60),
            },
            None,
        );

        let summary = scheduler.handle().trigger(Trigger::Manual).await.unwrap();
        tokio::time::sleep(Duration::from_secs(200)).await;

        assert_eq!(summary.outcome, CycleOutcome::Disabled);
        assert_eq!(gateway.calls(), GatewayCalls::default());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_skips_first_tick_then_fires_each_period() {
        let (gateway, orchestrator) = engine();
        let scheduler = Scheduler::start(
            orchestrator,
            SchedulerOptions {
                interval: Duration::from_secs(60),
            },
            None,
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cycles(&gateway), 0, "no cycle at start-up");

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(cycles(&gateway), 2, "ticks at 60s and 120s");
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_edge_requests_cycle() {
        let (gateway, orchestrator) = engine();
        let (reach_tx, reach_rx) = watch::channel(false);
        let scheduler = Scheduler::start(orchestrator.clone(), hourly(), Some(reach_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!orchestrator.is_online());
        assert_eq!(cycles(&gateway), 0);

        reach_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(orchestrator.is_online());
        assert_eq!(cycles(&gateway), 1);

        // Staying reachable is not an edge.
        reach_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cycles(&gateway), 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn requests_during_a_cycle_coalesce_into_one() {
        let (gateway, orchestrator) = engine();
        gateway.set_latency(Some(Duration::from_millis(100)));
        let scheduler = Scheduler::start(orchestrator, hourly(), None);
        let handle = scheduler.handle();

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.trigger(Trigger::Manual).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..4 {
            assert!(handle.request(Trigger::Foreground));
        }
        let second = handle.trigger(Trigger::Manual).await.unwrap();

        assert_eq!(first.await.unwrap().unwrap().coalesced, 1);
        assert_eq!(second.coalesced, 5);
        assert_eq!(second.trigger, "foreground");
        assert_eq!(cycles(&gateway), 2);
        scheduler.stop().await.unwrap();
    }

    #[test]
    fn trigger_labels() {
        assert_eq!(Trigger::Realtime(EntityKind::Player).to_string(), "realtime:players");
        assert_eq!(Trigger::Reconnected.to_string(), "reconnected");
    }
}
