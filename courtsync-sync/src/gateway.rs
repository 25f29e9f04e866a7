//! RemoteGateway: the authoritative backend as seen by the engine.
//!
//! Gateways carry no retry logic of their own; every retry decision belongs
//! to the orchestrator and the scheduler.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use courtsync_core::entity::{Entity, SyncableEntity};
use courtsync_core::types::{EntityId, EntityKind, EntityRef};

use crate::error::RemoteError;

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Entity>, RemoteError>;

    /// Create a row. Returns the server's canonical representation.
    async fn insert(&self, entity: &Entity) -> Result<Entity, RemoteError>;

    /// Replace an existing row. `NotFound` if it does not exist.
    async fn update(&self, entity: &Entity) -> Result<Entity, RemoteError>;

    /// `NotFound` if the row does not exist.
    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), RemoteError>;

    /// Insert-or-update. Safe to repeat.
    async fn upsert(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        match self.update(entity).await {
            Err(RemoteError::NotFound) => self.insert(entity).await,
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory gateway
// ---------------------------------------------------------------------------

/// Call counters kept by [`MemoryGateway`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub fetch_all: usize,
    pub insert: usize,
    pub update: usize,
    pub delete: usize,
}

#[derive(Debug, Default)]
struct MemoryRemote {
    rows: BTreeMap<EntityRef, Entity>,
    offline: Option<RemoteError>,
    failing: HashMap<EntityId, RemoteError>,
    calls: GatewayCalls,
}

/// A scriptable in-process remote.
///
/// Stored rows never carry `last_synced_at`; each accepted write bumps
/// `sync_version` the way the hosted backend does.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    inner: Mutex<MemoryRemote>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a row directly, as if another client had written it.
    pub fn seed(&self, entity: impl Into<Entity>) {
        let mut entity = entity.into();
        entity.meta_mut().last_synced_at = None;
        self.inner.lock().rows.insert(entity.entity_ref(), entity);
    }

    /// Remove a row directly, as if another client had deleted it.
    pub fn remove(&self, target: EntityRef) {
        self.inner.lock().rows.remove(&target);
    }

    pub fn get(&self, target: EntityRef) -> Option<Entity> {
        self.inner.lock().rows.get(&target).cloned()
    }

    pub fn rows(&self, kind: EntityKind) -> Vec<Entity> {
        self.inner
            .lock()
            .rows
            .values()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().rows.is_empty()
    }

    /// Every call fails with `Unreachable` while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().offline =
            unreachable.then(|| RemoteError::Unreachable("connection refused".into()));
    }

    /// Every call fails with `error` until cleared with `set_unreachable(false)`.
    pub fn fail_all_with(&self, error: RemoteError) {
        self.inner.lock().offline = Some(error);
    }

    /// Writes and deletes addressing `id` fail with `error`.
    pub fn fail_entity(&self, id: EntityId, error: RemoteError) {
        self.inner.lock().failing.insert(id, error);
    }

    pub fn clear_failure(&self, id: EntityId) {
        self.inner.lock().failing.remove(&id);
    }

    /// Delay every call by `latency` before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> GatewayCalls {
        self.inner.lock().calls
    }

    async fn pause(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check(remote: &MemoryRemote, id: Option<EntityId>) -> Result<(), RemoteError> {
        if let Some(error) = &remote.offline {
            return Err(error.clone());
        }
        if let Some(error) = id.and_then(|id| remote.failing.get(&id)) {
            return Err(error.clone());
        }
        Ok(())
    }

    fn accept(remote: &mut MemoryRemote, entity: &Entity) -> Entity {
        let previous = remote
            .rows
            .get(&entity.entity_ref())
            .map(|e| e.meta().sync_version)
            .unwrap_or(0);
        let mut stored = entity.clone();
        stored.meta_mut().last_synced_at = None;
        stored.meta_mut().sync_version = previous + 1;
        remote.rows.insert(stored.entity_ref(), stored.clone());
        stored
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Entity>, RemoteError> {
        self.pause().await;
        let mut remote = self.inner.lock();
        remote.calls.fetch_all += 1;
        Self::check(&remote, None)?;
        Ok(remote
            .rows
            .values()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect())
    }

    async fn insert(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        self.pause().await;
        let mut remote = self.inner.lock();
        remote.calls.insert += 1;
        Self::check(&remote, Some(entity.id()))?;
        if remote.rows.contains_key(&entity.entity_ref()) {
            return Err(RemoteError::server(
                409,
                format!("duplicate key value violates unique constraint ({})", entity.id()),
            ));
        }
        Ok(Self::accept(&mut remote, entity))
    }

    async fn update(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        self.pause().await;
        let mut remote = self.inner.lock();
        remote.calls.update += 1;
        Self::check(&remote, Some(entity.id()))?;
        if !remote.rows.contains_key(&entity.entity_ref()) {
            return Err(RemoteError::NotFound);
        }
        Ok(Self::accept(&mut remote, entity))
    }

    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), RemoteError> {
        self.pause().await;
        let mut remote = self.inner.lock();
        remote.calls.delete += 1;
        Self::check(&remote, Some(id))?;
        match remote.rows.remove(&EntityRef::new(kind, id)) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound),
        }
    }
}
