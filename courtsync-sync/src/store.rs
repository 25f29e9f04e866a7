//! LocalStore: the embedded database the engine reads from and writes back to.
//!
//! The store exclusively owns entities at rest; the orchestrator takes owned
//! copies for the length of a cycle and writes every change back through
//! [`LocalStore::upsert`]. Calls are synchronous and assumed cheap relative to
//! the network.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use courtsync_core::entity::{Entity, SyncableEntity};
use courtsync_core::types::{EntityId, EntityKind, EntityRef};

use crate::error::StoreError;

pub trait LocalStore: Send + Sync {
    fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError>;

    fn fetch_by_id(&self, kind: EntityKind, id: EntityId) -> Result<Option<Entity>, StoreError>;

    /// Insert or replace by `(kind, id)`.
    fn upsert(&self, entity: Entity) -> Result<(), StoreError>;

    /// Deleting an absent row is not an error.
    fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), StoreError>;

    /// Write `entity` only if the stored row still equals `expected`
    /// (`None`: the row must be absent). The check and the write happen
    /// under one lock. Returns whether the write happened.
    fn upsert_if_unchanged(
        &self,
        expected: Option<&Entity>,
        entity: Entity,
    ) -> Result<bool, StoreError>;

    /// Delete the row only if it still equals `expected`.
    fn delete_if_unchanged(&self, expected: &Entity) -> Result<bool, StoreError>;

    /// Rows whose `updated_at` is strictly after `since`.
    fn fetch_modified_since(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .fetch_all(kind)?
            .into_iter()
            .filter(|e| e.meta().updated_at > since)
            .collect())
    }

    fn fetch_dirty(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .fetch_all(kind)?
            .into_iter()
            .filter(|e| e.is_dirty())
            .collect())
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<EntityRef, Entity>>,
    failing_upserts: Mutex<HashSet<EntityId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock();
            for entity in entities {
                rows.insert(entity.entity_ref(), entity);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn get(&self, target: EntityRef) -> Option<Entity> {
        self.rows.lock().get(&target).cloned()
    }

    /// Reject subsequent upserts of `id` with [`StoreError::Unavailable`].
    pub fn fail_upserts_of(&self, id: EntityId) {
        self.failing_upserts.lock().insert(id);
    }

    fn check_upsert(&self, entity: &Entity) -> Result<(), StoreError> {
        if self.failing_upserts.lock().contains(&entity.id()) {
            return Err(StoreError::Unavailable(format!(
                "upsert rejected for {}",
                entity.entity_ref()
            )));
        }
        Ok(())
    }
}

impl LocalStore for MemoryStore {
    fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect())
    }

    fn fetch_by_id(&self, kind: EntityKind, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self.rows.lock().get(&EntityRef::new(kind, id)).cloned())
    }

    fn upsert(&self, entity: Entity) -> Result<(), StoreError> {
        self.check_upsert(&entity)?;
        self.rows.lock().insert(entity.entity_ref(), entity);
        Ok(())
    }

    fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), StoreError> {
        self.rows.lock().remove(&EntityRef::new(kind, id));
        Ok(())
    }

    fn upsert_if_unchanged(
        &self,
        expected: Option<&Entity>,
        entity: Entity,
    ) -> Result<bool, StoreError> {
        self.check_upsert(&entity)?;
        let mut rows = self.rows.lock();
        if rows.get(&entity.entity_ref()) != expected {
            return Ok(false);
        }
        rows.insert(entity.entity_ref(), entity);
        Ok(true)
    }

    fn delete_if_unchanged(&self, expected: &Entity) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock();
        let target = expected.entity_ref();
        if rows.get(&target) != Some(expected) {
            return Ok(false);
        }
        rows.remove(&target);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use courtsync_core::entity::{Player, Team};

    #[test]
    fn fetch_all_filters_by_kind() {
        let store = MemoryStore::with_entities([
            Team::new("Hawks", "U12", "Reyes").into(),
            Player::new("Ana", "Lopez", "4").into(),
        ]);
        assert_eq!(store.fetch_all(EntityKind::Team).unwrap().len(), 1);
        assert_eq!(store.fetch_all(EntityKind::Player).unwrap().len(), 1);
        assert!(store.fetch_all(EntityKind::Schedule).unwrap().is_empty());
    }

    #[test]
    fn modified_since_is_strict() {
        let team: Entity = Team::new("Hawks", "U12", "Reyes").into();
        let at = team.meta().updated_at;
        let store = MemoryStore::with_entities([team]);

        assert!(store
            .fetch_modified_since(EntityKind::Team, at)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .fetch_modified_since(EntityKind::Team, at - Duration::seconds(1))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn fetch_dirty_skips_clean_rows() {
        let dirty: Entity = Team::new("Hawks", "U12", "Reyes").into();
        let mut clean: Entity = Team::new("Owls", "U10", "Kim").into();
        let at = clean.meta().updated_at;
        clean.meta_mut().mark_synced(at);
        let store = MemoryStore::with_entities([dirty.clone(), clean]);

        let found = store.fetch_dirty(EntityKind::Team).unwrap();
        assert_eq!(found, vec![dirty]);
    }

    #[test]
    fn conditional_writes_refuse_a_changed_row() {
        let team: Entity = Team::new("Hawks", "U12", "Reyes").into();
        let store = MemoryStore::with_entities([team.clone()]);

        let mut edited = team.clone();
        edited.touch();
        store.upsert(edited.clone()).unwrap();

        assert!(!store.delete_if_unchanged(&team).unwrap());
        assert!(!store
            .upsert_if_unchanged(Some(&team), team.clone())
            .unwrap());
        assert!(!store.upsert_if_unchanged(None, team.clone()).unwrap());
        assert_eq!(store.get(team.entity_ref()), Some(edited.clone()));

        assert!(store.delete_if_unchanged(&edited).unwrap());
        assert!(store.upsert_if_unchanged(None, team.clone()).unwrap());
        assert_eq!(store.get(team.entity_ref()), Some(team));
    }

    #[test]
    fn delete_absent_is_ok() {
        let store = MemoryStore::new();
        store.delete(EntityKind::Team, EntityId::new()).unwrap();
    }
}
