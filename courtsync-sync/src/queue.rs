//! Pending operation queue: the durable, ordered log of remote intents.
//!
//! Persists a `QueueDocument` JSON document into a [`QueueSlot`]; the default
//! slot is `<home>/.courtsync/queue.json`, written with the same atomic `.tmp`
//! + rename pattern as the config file.
//!
//! The queue never fails an `enqueue`: if the slot rejects the write the
//! operation is still held in memory and a warning is logged.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use courtsync_core::types::{EntityRef, OperationKind, SyncOperation};

use crate::error::{queue_io_err, QueueError};

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// A key-value slot holding the serialized queue.
pub trait QueueSlot: Send + Sync {
    /// `None` when nothing was ever written.
    fn read(&self) -> Result<Option<Vec<u8>>, QueueError>;
    fn write(&self, bytes: &[u8]) -> Result<(), QueueError>;
}

/// `<home>/.courtsync/queue.json`
pub fn queue_path_at(home: &Path) -> PathBuf {
    home.join(".courtsync").join("queue.json")
}

/// File-backed slot with atomic replace.
#[derive(Debug, Clone)]
pub struct JsonFileSlot {
    path: PathBuf,
}

impl JsonFileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at(home: &Path) -> Self {
        Self::new(queue_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueSlot for JsonFileSlot {
    fn read(&self) -> Result<Option<Vec<u8>>, QueueError> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read(&self.path)
            .map(Some)
            .map_err(|e| queue_io_err(&self.path, e))
    }

    fn write(&self, bytes: &[u8]) -> Result<(), QueueError> {
        let Some(dir) = self.path.parent() else {
            return Err(queue_io_err(
                &self.path,
                std::io::Error::other("invalid queue path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| queue_io_err(dir, e))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| queue_io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(queue_io_err(&self.path, e));
        }
        Ok(())
    }
}

/// In-process slot. Can be told to reject writes.
#[derive(Debug, Default)]
pub struct MemorySlot {
    contents: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: Mutex::new(Some(bytes.into())),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.contents.lock().clone()
    }
}

impl QueueSlot for MemorySlot {
    fn read(&self) -> Result<Option<Vec<u8>>, QueueError> {
        Ok(self.contents.lock().clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), QueueError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("writes disabled".into()));
        }
        *self.contents.lock() = Some(bytes.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// On-disk queue payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueDocument {
    pub saved_at: DateTime<Utc>,
    pub operations: Vec<SyncOperation>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueueCompat {
    Structured(QueueStructuredCompat),
    Legacy(Vec<SyncOperation>),
}

#[derive(Debug, Deserialize)]
struct QueueStructuredCompat {
    #[allow(dead_code)]
    pub saved_at: Option<DateTime<Utc>>,
    pub operations: Vec<SyncOperation>,
}

fn decode(bytes: &[u8]) -> Result<Vec<SyncOperation>, QueueError> {
    match serde_json::from_slice::<QueueCompat>(bytes)? {
        QueueCompat::Structured(doc) => Ok(doc.operations),
        QueueCompat::Legacy(operations) => Ok(operations),
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Ordered, persisted list of operations awaiting replay.
pub struct PendingOperationQueue {
    ops: Mutex<VecDeque<SyncOperation>>,
    slot: Box<dyn QueueSlot>,
}

impl std::fmt::Debug for PendingOperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperationQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingOperationQueue {
    /// Load whatever the slot holds. An unreadable or corrupt slot starts the
    /// queue empty; the local store still carries every dirty entity.
    pub fn load(slot: impl QueueSlot + 'static) -> Self {
        let ops = match slot.read() {
            Ok(None) => VecDeque::new(),
            Ok(Some(bytes)) => match decode(&bytes) {
                Ok(ops) => VecDeque::from(ops),
                Err(error) => {
                    tracing::warn!(%error, "discarding unreadable pending queue");
                    VecDeque::new()
                }
            },
            Err(error) => {
                tracing::warn!(%error, "pending queue slot unreadable; starting empty");
                VecDeque::new()
            }
        };
        if !ops.is_empty() {
            tracing::info!(pending = ops.len(), "loaded pending operations");
        }
        Self {
            ops: Mutex::new(ops),
            slot: Box::new(slot),
        }
    }

    /// Queue backed by a [`MemorySlot`].
    pub fn in_memory() -> Self {
        Self::load(MemorySlot::new())
    }

    /// Append to the tail of the log.
    pub fn enqueue(&self, op: SyncOperation) {
        tracing::debug!(op = %op, "enqueue");
        let mut ops = self.ops.lock();
        ops.push_back(op);
        self.persist_locked(&ops);
    }

    /// Snapshot and clear in one step. Anything enqueued after this returns
    /// belongs to the next cycle.
    pub fn drain(&self) -> Vec<SyncOperation> {
        let mut ops = self.ops.lock();
        let drained: Vec<SyncOperation> = ops.drain(..).collect();
        if !drained.is_empty() {
            self.persist_locked(&ops);
        }
        drained
    }

    /// Put failed operations back at the head, preserving their order and
    /// keeping them ahead of anything appended while they were in flight.
    pub fn requeue_front(&self, failed: Vec<SyncOperation>) {
        if failed.is_empty() {
            return;
        }
        let mut ops = self.ops.lock();
        for op in failed.into_iter().rev() {
            ops.push_front(op);
        }
        self.persist_locked(&ops);
    }

    pub fn snapshot(&self) -> Vec<SyncOperation> {
        self.ops.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Entities whose most recent queued operation is a delete.
    pub fn pending_deletes(&self) -> HashSet<EntityRef> {
        let mut last: HashMap<EntityRef, OperationKind> = HashMap::new();
        for op in self.ops.lock().iter() {
            last.insert(op.target(), op.op);
        }
        last.into_iter()
            .filter(|(_, op)| *op == OperationKind::Delete)
            .map(|(target, _)| target)
            .collect()
    }

    /// Write the current contents to the slot.
    pub fn persist(&self) -> Result<(), QueueError> {
        let ops = self.ops.lock();
        self.write_slot(&ops)
    }

    fn persist_locked(&self, ops: &VecDeque<SyncOperation>) {
        if let Err(error) = self.write_slot(ops) {
            tracing::warn!(%error, pending = ops.len(), "failed to persist pending queue; kept in memory");
        }
    }

    fn write_slot(&self, ops: &VecDeque<SyncOperation>) -> Result<(), QueueError> {
        let doc = QueueDocument {
            saved_at: Utc::now(),
            operations: ops.iter().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&doc)?;
        self.slot.write(&json)
    }
}

impl<S: QueueSlot + ?Sized> QueueSlot for std::sync::Arc<S> {
    fn read(&self) -> Result<Option<Vec<u8>>, QueueError> {
        (**self).read()
    }

    fn write(&self, bytes: &[u8]) -> Result<(), QueueError> {
        (**self).write(bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
