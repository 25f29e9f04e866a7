//! JSON-file local store.
//!
//! Persists a `StoreDocument` at `<home>/.courtsync/store.json`. Reads are
//! served from the in-memory copy loaded at open; every write replaces the
//! file with the `.tmp` + rename pattern and only then commits to memory, so
//! memory never runs ahead of disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use courtsync_core::entity::{Entity, SyncableEntity};
use courtsync_core::types::{EntityId, EntityKind, EntityRef};

use crate::error::{store_io_err, StoreError};
use crate::store::LocalStore;

/// On-disk store payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreDocument {
    pub saved_at: DateTime<Utc>,
    pub entities: Vec<Entity>,
}

/// `<home>/.courtsync/store.json`
pub fn store_path_at(home: &Path) -> PathBuf {
    home.join(".courtsync").join("store.json")
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<EntityRef, Entity>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`. A missing file is an
    /// empty store; a corrupt one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut rows = BTreeMap::new();
        if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| store_io_err(&path, e))?;
            let doc: StoreDocument = serde_json::from_str(&contents)?;
            for entity in doc.entities {
                rows.insert(entity.entity_ref(), entity);
            }
            tracing::debug!(path = %path.display(), rows = rows.len(), "opened local store");
        }
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub fn open_at(home: &Path) -> Result<Self, StoreError> {
        Self::open(store_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy, persist it, then swap it in. `change`
    /// returns false to leave both disk and memory untouched.
    fn commit<F>(&self, change: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut BTreeMap<EntityRef, Entity>) -> bool,
    {
        let mut rows = self.rows.lock();
        let mut next = rows.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.save(&next)?;
        *rows = next;
        Ok(true)
    }

    fn save(&self, rows: &BTreeMap<EntityRef, Entity>) -> Result<(), StoreError> {
        let Some(dir) = self.path.parent() else {
            return Err(store_io_err(
                &self.path,
                std::io::Error::other("invalid store path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| store_io_err(dir, e))?;

        let doc = StoreDocument {
            saved_at: Utc::now(),
            entities: rows.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| store_io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(store_io_err(&self.path, e));
        }
        Ok(())
    }
}

impl LocalStore for JsonFileStore {
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
        self.commit(|rows| {
            rows.insert(entity.entity_ref(), entity);
            true
        })?;
        Ok(())
    }

    fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), StoreError> {
        let target = EntityRef::new(kind, id);
        self.commit(|rows| rows.remove(&target).is_some())?;
        Ok(())
    }

    fn upsert_if_unchanged(
        &self,
        expected: Option<&Entity>,
        entity: Entity,
    ) -> Result<bool, StoreError> {
        self.commit(|rows| {
            if rows.get(&entity.entity_ref()) != expected {
                return false;
            }
            rows.insert(entity.entity_ref(), entity);
            true
        })
    }

    fn delete_if_unchanged(&self, expected: &Entity) -> Result<bool, StoreError> {
        let target = expected.entity_ref();
        self.commit(|rows| {
            if rows.get(&target) != Some(expected) {
                return false;
            }
            rows.remove(&target).is_some()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtsync_core::entity::{Announcement, Team};
    use tempfile::TempDir;

    #[test]
    fn empty_store_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::open_at(tmp.path()).unwrap();
        assert!(store.fetch_all(EntityKind::Team).unwrap().is_empty());
        assert!(!store.path().exists(), "open must not create the file");
    }

    #[test]
    fn writes_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let team: Entity = Team::new("Hawks", "U14", "Reyes").into();
        let note: Entity = Announcement::new("Bring water", "Hot day").into();
        {
            let store = JsonFileStore::open_at(tmp.path()).unwrap();
            store.upsert(team.clone()).unwrap();
            store.upsert(note.clone()).unwrap();
            store.delete(EntityKind::Announcement, note.id()).unwrap();
        }

        let store = JsonFileStore::open_at(tmp.path()).unwrap();
        assert_eq!(store.fetch_all(EntityKind::Team).unwrap(), vec![team]);
        assert!(store.fetch_all(EntityKind::Announcement).unwrap().is_empty());
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::open_at(tmp.path()).unwrap();
        store
            .upsert(Team::new("Hawks", "U14", "Reyes").into())
            .unwrap();
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn conditional_delete_keeps_an_edited_row_on_disk() {
        let tmp = TempDir::new().unwrap();
        let team: Entity = Team::new("Hawks", "U14", "Reyes").into();
        let mut edited = team.clone();
        edited.touch();
        {
            let store = JsonFileStore::open_at(tmp.path()).unwrap();
            store.upsert(edited.clone()).unwrap();
            assert!(!store.delete_if_unchanged(&team).unwrap());
            assert!(!store
                .upsert_if_unchanged(Some(&team), team.clone())
                .unwrap());
        }

        let store = JsonFileStore::open_at(tmp.path()).unwrap();
        assert_eq!(store.fetch_all(EntityKind::Team).unwrap(), vec![edited.clone()]);
        assert!(store.delete_if_unchanged(&edited).unwrap());
        assert!(store.fetch_all(EntityKind::Team).unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = store_path_at(tmp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Json(_))
        ));
    }
}
