// Core domain types shared by the coordination library, the relay and clients.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic per-entity version stamp. `0` means the entity does not exist yet.
pub type Version = u64;

/// A collaboratively edited graph node (decision record, pattern, gotcha, task)
/// as held by the graph store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub entity_id: String,
    pub team_id: String,
    pub version: Version,
    pub content: serde_json::Value,
    pub last_modified: DateTime<Utc>,
    pub last_modified_by: String,
}

/// Proof of an exclusive, time-bounded edit claim on one entity.
///
/// Only the last-issued token for an entity can renew or release it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockToken {
    pub token_id: Uuid,
    pub entity_id: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewable: bool,
    /// Entity version observed when the lock was granted.
    pub base_version: Version,
}

impl LockToken {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LockAction {
    Acquired,
    Released,
    Expired,
}

impl LockAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }
}

/// "Being edited by X" notification for presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockEvent {
    pub entity_id: String,
    pub holder_id: String,
    pub action: LockAction,
    pub at: DateTime<Utc>,
}

/// Per-member synchronization bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub member_id: String,
    pub team_id: String,
    pub last_synced_at: DateTime<Utc>,
    /// Watched entity id -> last version observed by the member.
    #[serde(default)]
    pub last_synced_version_vector: BTreeMap<String, Version>,
}

impl SyncState {
    /// Merge observed versions into the vector. Entries never move backwards.
    pub fn observe<I>(&mut self, observed: I)
    where
        I: IntoIterator<Item = (String, Version)>,
    {
        for (entity_id, version) in observed {
            let slot = self.last_synced_version_vector.entry(entity_id).or_insert(version);
            if *slot < version {
                *slot = version;
            }
        }
    }
}

/// How a member wants a version conflict settled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepMine,
    KeepTheirs,
    ManualMerge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepMine => "keep_mine",
            Self::KeepTheirs => "keep_theirs",
            Self::ManualMerge => "manual_merge",
        }
    }
}

/// A save whose expected version no longer matched the stored version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictRecord {
    pub conflict_id: Uuid,
    pub team_id: String,
    pub entity_id: String,
    /// Version the editor started from.
    pub base_version: Version,
    /// Version in the store when the save was rejected.
    pub current_version: Version,
    pub local_change: serde_json::Value,
    pub remote_change: serde_json::Value,
    pub author_id: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<ResolutionStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Externally supplied activity tier used to pick a staleness threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityClass {
    #[default]
    Active,
    Occasional,
}

/// Advisory freshness of a member's local view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale { age_seconds: u64, threshold_seconds: u64 },
    NeverSynced { threshold_seconds: u64 },
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    /// True when the member should pull before editing: stale or never synced.
    pub fn needs_sync(&self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

/// A watched entity whose stored version is ahead of the member's vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaggingEntity {
    pub entity_id: String,
    pub observed_version: Version,
    pub current_version: Version,
}
