//! Identifiers, entity kinds and queued sync operations.
//!
//! Every synchronized row is addressed by an [`EntityRef`]: the collection it
//! lives in ([`EntityKind`]) plus its stable [`EntityId`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identifier assigned at creation and shared by local and remote copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Fresh random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The synchronized collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Team,
    Player,
    Schedule,
    Announcement,
}

impl EntityKind {
    /// All kinds in sync order: parents before the rows that reference them.
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Team,
            EntityKind::Player,
            EntityKind::Schedule,
            EntityKind::Announcement,
        ]
    }

    /// Remote table backing this kind.
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::Team => "teams",
            EntityKind::Player => "players",
            EntityKind::Schedule => "schedules",
            EntityKind::Announcement => "announcements",
        }
    }

    /// Reverse of [`EntityKind::table_name`].
    pub fn from_table(table: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.table_name().eq_ignore_ascii_case(table.trim()))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Team => write!(f, "team"),
            EntityKind::Player => write!(f, "player"),
            EntityKind::Schedule => write!(f, "schedule"),
            EntityKind::Announcement => write!(f, "announcement"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "team" | "teams" => Ok(EntityKind::Team),
            "player" | "players" => Ok(EntityKind::Player),
            "schedule" | "schedules" => Ok(EntityKind::Schedule),
            "announcement" | "announcements" => Ok(EntityKind::Announcement),
            other => Err(format!(
                "unknown entity kind '{other}'; expected: team, player, schedule, announcement"
            )),
        }
    }
}

/// What a queued operation asks the remote to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// `(kind, id)` join key between local and remote rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// One persisted intent in the pending operation log.
///
/// Operations for the same entity are never merged; replay is ordered and
/// each remote call is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub op: OperationKind,
    pub kind: EntityKind,
    pub id: EntityId,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncOperation {
    pub fn new(op: OperationKind, target: EntityRef) -> Self {
        Self {
            op,
            kind: target.kind,
            id: target.id,
            enqueued_at: Utc::now(),
        }
    }

    pub fn create(target: EntityRef) -> Self {
        Self::new(OperationKind::Create, target)
    }

    pub fn update(target: EntityRef) -> Self {
        Self::new(OperationKind::Update, target)
    }

    pub fn delete(target: EntityRef) -> Self {
        Self::new(OperationKind::Delete, target)
    }

    pub fn target(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id)
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.target())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
