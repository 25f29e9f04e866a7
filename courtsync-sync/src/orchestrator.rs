//! SyncOrchestrator: drives one full replay → push → pull cycle.
//!
//! ## `run_cycle` phases
//!
//! 1. Guard: bail out with `AlreadyRunning` if another cycle holds the flag.
//! 2. Status → `Syncing`.
//! 3. Replay: drain the pending queue and send each operation.
//! 4. Push: upsert every dirty local entity, marking it synced on success.
//! 5. Pull: fetch every remote table and merge into the local store.
//! 6. Status → `Success`, or `Failure` if a fatal error cut the cycle short.
//!
//! Every phase writes back per entity, so an abandoned cycle keeps whatever
//! progress it made.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use courtsync_core::config::SyncSettings;
use courtsync_core::entity::{Entity, SyncableEntity};
use courtsync_core::types::{EntityId, EntityKind, EntityRef, OperationKind, SyncOperation};

use crate::conflict::{ConflictPolicy, LastWriterWins, Winner};
use crate::error::{RemoteError, StoreError, SyncError};
use crate::gateway::RemoteGateway;
use crate::queue::PendingOperationQueue;
use crate::status::{StatusPublisher, SyncStatus};
use crate::store::LocalStore;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Upper bound on every gateway call.
    pub call_timeout: Duration,
    /// Delete clean local rows that disappeared from the remote.
    pub prune_remote_deletions: bool,
    /// Initial value of the administrative enable flag.
    pub enabled: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            prune_remote_deletions: true,
            enabled: true,
        }
    }
}

impl From<&SyncSettings> for OrchestratorOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            call_timeout: settings.request_timeout(),
            prune_remote_deletions: settings.prune_remote_deletions,
            enabled: settings.enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Replay,
    Push,
    Pull,
}

/// One entity (or queued operation) that could not be synced this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity: EntityRef,
    pub phase: Phase,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    pub replayed: usize,
    pub pushed: usize,
    pub pulled: usize,
    pub removed: usize,
    pub failures: Vec<EntityFailure>,
    pub duration_ms: u64,
}

impl CycleResult {
    fn fail(&mut self, entity: EntityRef, phase: Phase, error: impl ToString) {
        let error = error.to_string();
        tracing::warn!(%entity, ?phase, %error, "entity sync failed");
        self.failures.push(EntityFailure {
            entity,
            phase,
            error,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CycleResult),
    Aborted { result: CycleResult, error: String },
    AlreadyRunning,
    Disabled,
}

impl CycleOutcome {
    pub fn result(&self) -> Option<&CycleResult> {
        match self {
            CycleOutcome::Completed(result) | CycleOutcome::Aborted { result, .. } => Some(result),
            CycleOutcome::AlreadyRunning | CycleOutcome::Disabled => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }
}

/// Whether a local mutation reached the remote right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveOutcome {
    Pushed,
    Queued,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    queue: Arc<PendingOperationQueue>,
    status: StatusPublisher,
    policy: Box<dyn ConflictPolicy>,
    options: OrchestratorOptions,
    running: AtomicBool,
    enabled: AtomicBool,
    online: AtomicBool,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("options", &self.options)
            .field("running", &self.is_running())
            .field("enabled", &self.is_enabled())
            .field("online", &self.is_online())
            .finish()
    }
}

/// Clears the single-flight flag on every exit path.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Merge {
    Inserted,
    Updated,
    Unchanged,
    KeptLocal,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        queue: Arc<PendingOperationQueue>,
    ) -> Self {
        let options = OrchestratorOptions::default();
        Self {
            store,
            gateway,
            queue,
            status: StatusPublisher::new(),
            policy: Box::new(LastWriterWins),
            enabled: AtomicBool::new(options.enabled),
            options,
            running: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.enabled.store(options.enabled, Ordering::SeqCst);
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: impl ConflictPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<PendingOperationQueue> {
        &self.queue
    }

    pub fn status(&self) -> &StatusPublisher {
        &self.status
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            tracing::info!(enabled, "sync enable flag changed");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            tracing::info!(online, "connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Dirty rows across every kind.
    pub fn dirty_count(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for &kind in EntityKind::all() {
            total += self.store.fetch_dirty(kind)?.len();
        }
        Ok(total)
    }

    /// Rows edited after `since` across every kind.
    pub fn changed_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut total = 0;
        for &kind in EntityKind::all() {
            total += self.store.fetch_modified_since(kind, since)?.len();
        }
        Ok(total)
    }

    // -- cycle --------------------------------------------------------------

    /// Run one cycle. Never returns an error: failures land in the outcome
    /// and in the published status.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if !self.is_enabled() {
            tracing::debug!("sync disabled; skipping cycle");
            return CycleOutcome::Disabled;
        }
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            tracing::debug!("cycle already running");
            return CycleOutcome::AlreadyRunning;
        };

        let started = Instant::now();
        self.status.set(SyncStatus::Syncing {
            started_at: Utc::now(),
        });

        let mut result = CycleResult::default();
        let outcome = self.run_phases(&mut result).await;
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(()) => {
                self.status.set(SyncStatus::Success { at: Utc::now() });
                tracing::info!(
                    replayed = result.replayed,
                    pushed = result.pushed,
                    pulled = result.pulled,
                    removed = result.removed,
                    failures = result.failures.len(),
                    duration_ms = result.duration_ms,
                    "sync cycle complete"
                );
                CycleOutcome::Completed(result)
            }
            Err(error) => {
                let error = error.to_string();
                self.status.set(SyncStatus::Failure {
                    error: error.clone(),
                    at: Utc::now(),
                });
                tracing::warn!(%error, duration_ms = result.duration_ms, "sync cycle aborted");
                CycleOutcome::Aborted { result, error }
            }
        }
    }

    async fn run_phases(&self, result: &mut CycleResult) -> Result<(), SyncError> {
        let replayed = self.replay(result).await?;
        self.push(result, &replayed).await?;
        self.pull(result).await
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.options.call_timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RemoteError::Network(format!(
                "request timed out after {}s",
                self.options.call_timeout.as_secs_f32()
            ))),
        }
    }

    // -- replay -------------------------------------------------------------

    /// Returns the entities whose queued write was sent this cycle, so push
    /// does not send them a second time.
    async fn replay(&self, result: &mut CycleResult) -> Result<HashSet<EntityRef>, SyncError> {
        let mut attempted = HashSet::new();
        let drained = self.queue.drain();
        if drained.is_empty() {
            return Ok(attempted);
        }
        tracing::debug!(operations = drained.len(), "replaying pending operations");

        let mut failed = Vec::new();
        let mut remaining = drained.into_iter();
        while let Some(op) = remaining.next() {
            if op.op != OperationKind::Delete {
                attempted.insert(op.target());
            }
            match self.replay_one(&op).await {
                Ok(()) => result.replayed += 1,
                Err(error) if error.is_fatal() => {
                    failed.push(op);
                    failed.extend(remaining);
                    self.queue.requeue_front(failed);
                    return Err(error);
                }
                Err(error) => {
                    result.fail(op.target(), Phase::Replay, &error);
                    failed.push(op);
                }
            }
        }
        self.queue.requeue_front(failed);
        Ok(attempted)
    }

    async fn replay_one(&self, op: &SyncOperation) -> Result<(), SyncError> {
        match op.op {
            OperationKind::Delete => match self.call(self.gateway.delete(op.kind, op.id)).await {
                Ok(()) | Err(RemoteError::NotFound) => Ok(()),
                Err(error) => Err(error.into()),
            },
            OperationKind::Create | OperationKind::Update => {
                let Some(local) = self.store.fetch_by_id(op.kind, op.id)? else {
                    tracing::debug!(op = %op, "local row gone; dropping queued write");
                    return Ok(());
                };
                let canonical = self.call(self.gateway.upsert(&local)).await?;
                self.write_back(&local, &canonical)?;
                Ok(())
            }
        }
    }

    // -- push ---------------------------------------------------------------

    async fn push(
        &self,
        result: &mut CycleResult,
        replayed: &HashSet<EntityRef>,
    ) -> Result<(), SyncError> {
        for &kind in EntityKind::all() {
            for entity in self.store.fetch_dirty(kind)? {
                let target = entity.entity_ref();
                if replayed.contains(&target) {
                    continue;
                }
                match self.call(self.gateway.upsert(&entity)).await {
                    Ok(canonical) => {
                        result.pushed += 1;
                        if let Err(error) = self.write_back(&entity, &canonical) {
                            result.fail(target, Phase::Push, error);
                        }
                    }
                    Err(error) if error.is_fatal() => return Err(error.into()),
                    Err(error) => result.fail(target, Phase::Push, error),
                }
            }
        }
        Ok(())
    }

    /// Mark `pushed` synced unless it was edited or deleted while the call was
    /// in flight. Returns whether the row is now clean.
    fn write_back(&self, pushed: &Entity, canonical: &Entity) -> Result<bool, StoreError> {
        let Some(current) = self.store.fetch_by_id(pushed.kind(), pushed.id())? else {
            return Ok(false);
        };
        if current.meta().updated_at != pushed.meta().updated_at {
            tracing::debug!(entity = %pushed.entity_ref(), "edited during push; left dirty");
            return Ok(false);
        }
        let mut synced = current.clone();
        synced.meta_mut().sync_version = canonical.meta().sync_version;
        synced.meta_mut().mark_synced(Utc::now());
        let written = self.store.upsert_if_unchanged(Some(&current), synced)?;
        if !written {
            tracing::debug!(entity = %pushed.entity_ref(), "edited during write-back; left dirty");
        }
        Ok(written)
    }

    // -- pull ---------------------------------------------------------------

    async fn pull(&self, result: &mut CycleResult) -> Result<(), SyncError> {
        let pending_deletes = self.queue.pending_deletes();
        for &kind in EntityKind::all() {
            let rows = self.call(self.gateway.fetch_all(kind)).await?;
            let mut seen: HashSet<EntityId> = HashSet::with_capacity(rows.len());

            for remote in rows {
                let target = remote.entity_ref();
                seen.insert(target.id);
                if pending_deletes.contains(&target) {
                    continue;
                }
                match self.merge(remote) {
                    Ok(Merge::Inserted | Merge::Updated) => result.pulled += 1,
                    Ok(Merge::Unchanged | Merge::KeptLocal) => {}
                    Err(error) => result.fail(target, Phase::Pull, error),
                }
            }

            if self.options.prune_remote_deletions {
                for local in self.store.fetch_all(kind)? {
                    if seen.contains(&local.id()) || local.is_dirty() {
                        continue;
                    }
                    match self.store.delete_if_unchanged(&local) {
                        Ok(true) => {
                            tracing::debug!(entity = %local.entity_ref(), "removed remotely deleted row");
                            result.removed += 1;
                        }
                        Ok(false) => {
                            tracing::debug!(entity = %local.entity_ref(), "edited during pull; not removed");
                        }
                        Err(error) => result.fail(local.entity_ref(), Phase::Pull, error),
                    }
                }
            }
        }
        Ok(())
    }

    fn merge(&self, remote: Entity) -> Result<Merge, StoreError> {
        let target = remote.entity_ref();
        let local = self.store.fetch_by_id(target.kind, target.id)?;
        let (accepted, merge) = match &local {
            None => (remote, Merge::Inserted),
            Some(local) if !local.is_dirty() => {
                if local.content_eq(&remote) {
                    return Ok(Merge::Unchanged);
                }
                (remote, Merge::Updated)
            }
            Some(local) => match self.policy.resolve(local, &remote) {
                Winner::Local => {
                    tracing::debug!(entity = %local.entity_ref(), "conflict: local kept");
                    return Ok(Merge::KeptLocal);
                }
                Winner::Remote => {
                    tracing::debug!(entity = %local.entity_ref(), "conflict: remote kept");
                    (remote, Merge::Updated)
                }
            },
        };
        let mut accepted = accepted;
        accepted.meta_mut().mark_synced(Utc::now());
        if !self.store.upsert_if_unchanged(local.as_ref(), accepted)? {
            tracing::debug!(entity = %target, "edited during pull; kept local");
            return Ok(Merge::KeptLocal);
        }
        Ok(merge)
    }

    // -- application mutations ----------------------------------------------

    /// Record a local edit and try to push it straight away. The local write
    /// always happens; the remote write falls back to the pending queue.
    pub async fn save(&self, entity: impl Into<Entity>) -> Result<SaveOutcome, SyncError> {
        let mut entity = entity.into();
        entity.touch();
        self.store.upsert(entity.clone())?;

        let op = if entity.meta().last_synced_at.is_none() {
            SyncOperation::create(entity.entity_ref())
        } else {
            SyncOperation::update(entity.entity_ref())
        };
        if !self.is_enabled() || !self.is_online() {
            self.queue.enqueue(op);
            return Ok(SaveOutcome::Queued);
        }
        match self.call(self.gateway.upsert(&entity)).await {
            Ok(canonical) => {
                self.write_back(&entity, &canonical)?;
                Ok(SaveOutcome::Pushed)
            }
            Err(error) => {
                tracing::warn!(entity = %entity.entity_ref(), %error, "immediate push failed; queued");
                self.queue.enqueue(op);
                Ok(SaveOutcome::Queued)
            }
        }
    }

    /// Delete locally and remotely, queueing the remote delete when it cannot
    /// be sent now.
    pub async fn remove(&self, kind: EntityKind, id: EntityId) -> Result<SaveOutcome, SyncError> {
        self.store.delete(kind, id)?;

        let op = SyncOperation::delete(EntityRef::new(kind, id));
        if !self.is_enabled() || !self.is_online() {
            self.queue.enqueue(op);
            return Ok(SaveOutcome::Queued);
        }
        match self.call(self.gateway.delete(kind, id)).await {
            Ok(()) | Err(RemoteError::NotFound) => Ok(SaveOutcome::Pushed),
            Err(error) => {
                tracing::warn!(entity = %op.target(), %error, "immediate delete failed; queued");
                self.queue.enqueue(op);
                Ok(SaveOutcome::Queued)
            }
        }
    }
}
