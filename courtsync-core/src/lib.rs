//! Courtsync core library: synchronized entity contract, ids, queued
//! operations and configuration.
//!
//! - [`types`]: ids, kinds, [`SyncOperation`]
//! - [`entity`]: [`SyncableEntity`] and the synchronized models
//! - [`config`]: YAML config load / save / init
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod entity;
pub mod error;
pub mod types;

pub use config::{Config, RemoteConfig, SyncSettings};
pub use entity::{
    Announcement, Entity, EventType, Player, Priority, Schedule, SyncMeta, SyncableEntity, Team,
};
pub use error::ConfigError;
pub use types::{EntityId, EntityKind, EntityRef, OperationKind, SyncOperation};
