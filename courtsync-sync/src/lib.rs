//! # courtsync-sync
//!
//! Offline-first sync engine.
//!
//! Build a [`SyncOrchestrator`] from a [`LocalStore`], a [`RemoteGateway`]
//! and a [`PendingOperationQueue`], then call
//! [`run_cycle`](SyncOrchestrator::run_cycle) whenever a cycle is due.
//! Application edits go through [`save`](SyncOrchestrator::save) and
//! [`remove`](SyncOrchestrator::remove) so they are either pushed at once or
//! queued for the next cycle.

pub mod conflict;
pub mod error;
pub mod file_store;
pub mod gateway;
pub mod http_gateway;
pub mod orchestrator;
pub mod queue;
pub mod status;
pub mod store;

pub use conflict::{ConflictPolicy, LastWriterWins, Winner};
pub use error::{QueueError, RemoteError, StoreError, SyncError};
pub use file_store::JsonFileStore;
pub use gateway::{MemoryGateway, RemoteGateway};
pub use http_gateway::RestGateway;
pub use orchestrator::{
    CycleOutcome, CycleResult, EntityFailure, OrchestratorOptions, Phase, SaveOutcome,
    SyncOrchestrator,
};
pub use queue::{JsonFileSlot, MemorySlot, PendingOperationQueue, QueueSlot};
pub use status::{StatusPublisher, SyncStatus};
pub use store::{LocalStore, MemoryStore};
