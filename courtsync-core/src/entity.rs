//! The `SyncableEntity` contract and the synchronized models.
//!
//! Every model embeds a [`SyncMeta`] (flattened on the wire) carrying the
//! bookkeeping the engine relies on:
//!
//! - `id`: immutable join key.
//! - `updated_at`: advanced on every local field change.
//! - `last_synced_at`: `None` until the first confirmed round-trip. Local only.
//! - `sync_version`: bumped by the remote on each accepted write.
//!
//! An entity is *dirty* iff `last_synced_at` is `None` or older than
//! `updated_at`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityId, EntityKind, EntityRef};

// ---------------------------------------------------------------------------
// Sync metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub id: EntityId,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_version: i64,
}

impl SyncMeta {
    /// Metadata for a freshly created, never-pushed entity.
    pub fn new() -> Self {
        Self {
            id: EntityId::new(),
            updated_at: Utc::now(),
            last_synced_at: None,
            sync_version: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self.last_synced_at {
            None => true,
            Some(synced) => self.updated_at > synced,
        }
    }

    /// Record a local mutation. `updated_at` strictly increases even when the
    /// wall clock has not moved (or moved backwards).
    pub fn touch(&mut self) {
        let floor = self.updated_at + Duration::milliseconds(1);
        self.updated_at = Utc::now().max(floor);
    }

    /// Record a confirmed round-trip at `at`. Never leaves the entity dirty,
    /// even if `updated_at` is ahead of the local clock.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at.max(self.updated_at));
    }
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Shape every synchronized type satisfies.
pub trait SyncableEntity {
    fn kind(&self) -> EntityKind;
    fn meta(&self) -> &SyncMeta;
    fn meta_mut(&mut self) -> &mut SyncMeta;

    fn id(&self) -> EntityId {
        self.meta().id
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id())
    }

    fn is_dirty(&self) -> bool {
        self.meta().is_dirty()
    }

    fn touch(&mut self) {
        self.meta_mut().touch()
    }
}

macro_rules! impl_syncable {
    ($ty:ty, $kind:expr) => {
        impl SyncableEntity for $ty {
            fn kind(&self) -> EntityKind {
                $kind
            }

            fn meta(&self) -> &SyncMeta {
                &self.sync
            }

            fn meta_mut(&mut self) -> &mut SyncMeta {
                &mut self.sync
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    #[serde(flatten)]
    pub sync: SyncMeta,
    pub name: String,
    pub team_code: String,
    #[serde(default)]
    pub age_group: String,
    #[serde(default)]
    pub coach_name: String,
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    #[serde(default = "default_secondary_color")]
    pub secondary_color: String,
    #[serde(default)]
    pub wins: i32,
    #[serde(default)]
    pub losses: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Team {
    pub fn new(
        name: impl Into<String>,
        age_group: impl Into<String>,
        coach_name: impl Into<String>,
    ) -> Self {
        let sync = SyncMeta::new();
        let team_code = team_code_for(&sync.id);
        Self {
            sync,
            name: name.into(),
            team_code,
            age_group: age_group.into(),
            coach_name: coach_name.into(),
            primary_color: default_primary_color(),
            secondary_color: default_secondary_color(),
            wins: 0,
            losses: 0,
            is_active: true,
        }
    }
}

impl_syncable!(Team, EntityKind::Team);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    #[serde(flatten)]
    pub sync: SyncMeta,
    #[serde(default)]
    pub team_id: Option<EntityId>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub jersey_number: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub graduation_year: Option<i32>,
    #[serde(default)]
    pub parent_email: Option<String>,
    #[serde(default)]
    pub medical_notes: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Player {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        jersey_number: impl Into<String>,
    ) -> Self {
        Self {
            sync: SyncMeta::new(),
            team_id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            jersey_number: jersey_number.into(),
            position: String::new(),
            graduation_year: None,
            parent_email: None,
            medical_notes: None,
            is_active: true,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl_syncable!(Player, EntityKind::Player);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    Game,
    Practice,
    Tournament,
    Scrimmage,
    TeamEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(flatten)]
    pub sync: SyncMeta,
    #[serde(default)]
    pub team_id: Option<EntityId>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub opponent: Option<String>,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_home: bool,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub team_score: Option<i32>,
    #[serde(default)]
    pub opponent_score: Option<i32>,
}

impl Schedule {
    pub fn new(event_type: EventType, location: impl Into<String>, starts_at: DateTime<Utc>) -> Self {
        Self {
            sync: SyncMeta::new(),
            team_id: None,
            event_type,
            opponent: None,
            location: location.into(),
            starts_at,
            is_home: true,
            is_cancelled: false,
            notes: None,
            team_score: None,
            opponent_score: None,
        }
    }
}

impl_syncable!(Schedule, EntityKind::Schedule);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(flatten)]
    pub sync: SyncMeta,
    #[serde(default)]
    pub team_id: Option<EntityId>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Announcement {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sync: SyncMeta::new(),
            team_id: None,
            title: title.into(),
            content: content.into(),
            priority: Priority::Normal,
            is_pinned: false,
            expires_at: None,
        }
    }
}

impl_syncable!(Announcement, EntityKind::Announcement);

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Any synchronized row. Serialized with a `kind` tag for local persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Team(Team),
    Player(Player),
    Schedule(Schedule),
    Announcement(Announcement),
}

impl Entity {
    /// True when both versions hold the same fields, ignoring the local-only
    /// `last_synced_at`.
    pub fn content_eq(&self, other: &Entity) -> bool {
        let mut left = self.clone();
        let mut right = other.clone();
        left.meta_mut().last_synced_at = None;
        right.meta_mut().last_synced_at = None;
        left == right
    }
}

impl SyncableEntity for Entity {
    fn kind(&self) -> EntityKind {
        match self {
            Entity::Team(_) => EntityKind::Team,
            Entity::Player(_) => EntityKind::Player,
            Entity::Schedule(_) => EntityKind::Schedule,
            Entity::Announcement(_) => EntityKind::Announcement,
        }
    }

    fn meta(&self) -> &SyncMeta {
        match self {
            Entity::Team(t) => &t.sync,
            Entity::Player(p) => &p.sync,
            Entity::Schedule(s) => &s.sync,
            Entity::Announcement(a) => &a.sync,
        }
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        match self {
            Entity::Team(t) => &mut t.sync,
            Entity::Player(p) => &mut p.sync,
            Entity::Schedule(s) => &mut s.sync,
            Entity::Announcement(a) => &mut a.sync,
        }
    }
}

impl From<Team> for Entity {
    fn from(team: Team) -> Self {
        Entity::Team(team)
    }
}

impl From<Player> for Entity {
    fn from(player: Player) -> Self {
        Entity::Player(player)
    }
}

impl From<Schedule> for Entity {
    fn from(schedule: Schedule) -> Self {
        Entity::Schedule(schedule)
    }
}

impl From<Announcement> for Entity {
    fn from(announcement: Announcement) -> Self {
        Entity::Announcement(announcement)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

const TEAM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Six-character join code derived from the team's random id.
fn team_code_for(id: &EntityId) -> String {
    id.0.as_bytes()
        .iter()
        .take(6)
        .map(|b| TEAM_CODE_ALPHABET[usize::from(*b) % TEAM_CODE_ALPHABET.len()] as char)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_primary_color() -> String {
    "#000000".to_string()
}

fn default_secondary_color() -> String {
    "#FFFFFF".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_is_dirty() {
        let team = Team::new("Express 14U", "14U", "Coach Kim");
        assert!(team.is_dirty());
        assert_eq!(team.team_code.len(), 6);
    }

    #[test]
    fn mark_synced_makes_clean_and_touch_makes_dirty() {
        let mut player = Player::new("Ada", "Lovelace", "7");
        player.meta_mut().mark_synced(Utc::now());
        assert!(!player.is_dirty());

        player.touch();
        assert!(player.is_dirty());
    }

    #[test]
    fn touch_is_strictly_monotonic() {
        let mut meta = SyncMeta::new();
        meta.updated_at = Utc::now() + Duration::hours(1);
        let before = meta.updated_at;
        meta.touch();
        assert!(meta.updated_at > before);
    }

    #[test]
    fn mark_synced_with_future_updated_at_is_still_clean() {
        let mut meta = SyncMeta::new();
        meta.updated_at = Utc::now() + Duration::minutes(10);
        meta.mark_synced(Utc::now());
        assert!(!meta.is_dirty());
        assert_eq!(meta.last_synced_at, Some(meta.updated_at));
    }

    #[test]
    fn flattened_meta_on_the_wire() {
        let team = Team::new("Express", "12U", "Coach Lee");
        let json = serde_json::to_value(Entity::from(team.clone())).expect("serialize");
        assert_eq!(json["kind"], "team");
        assert_eq!(json["id"], team.sync.id.to_string());
        assert!(json.get("last_synced_at").is_none());

        let back: Entity = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, Entity::Team(team));
    }

    #[test]
    fn content_eq_ignores_last_synced_at() {
        let announcement = Announcement::new("Picture day", "Wear home jerseys");
        let mut synced = announcement.clone();
        synced.sync.mark_synced(Utc::now());

        let a = Entity::from(announcement);
        let b = Entity::from(synced);
        assert_ne!(a, b);
        assert!(a.content_eq(&b));
    }
}
