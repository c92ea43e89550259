// Request/response bodies for the teamgraph.v1 HTTP surface.
//
// Shared by the relay (server side) and CLI/dashboard clients.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::StructuralDiff;
use crate::types::{
    ActivityClass, ConflictRecord, Freshness, LaggingEntity, LockToken, ResolutionStrategy,
    SyncState, Version,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireLockRequest {
    pub holder_id: String,
}

/// Body for renew and release: the token previously issued by acquire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockTokenRequest {
    pub token: LockToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockEnvelope {
    pub lock: LockToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockHolderEnvelope {
    pub lock: Option<LockToken>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Released,
    AlreadyInactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseLockResponse {
    pub status: ReleaseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRequest {
    pub team_id: String,
    pub author_id: String,
    pub expected_version: Version,
    pub content: serde_json::Value,
    /// Lock to release once the write commits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockToken>,
    /// Settle a conflict inside the same request instead of parking it.
    /// `manual_merge` is not accepted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_conflict: Option<ResolutionStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommittedResponse {
    pub entity_id: String,
    pub new_version: Version,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolveConflictRequest {
    pub strategy: ResolutionStrategy,
    /// Required for `manual_merge`, rejected otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionResult {
    Committed { entity_id: String, new_version: Version },
    KeptTheirs { entity_id: String, version: Version, content: serde_json::Value },
    /// A third writer raced the resolution; the caller must resolve again.
    Conflict { conflict: ConflictRecord },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolveConflictResponse {
    pub conflict_id: Uuid,
    pub strategy: ResolutionStrategy,
    pub result: ResolutionResult,
    pub diff: StructuralDiff,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictsQuery {
    pub team_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictsEnvelope {
    pub items: Vec<ConflictRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StalenessQuery {
    #[serde(default)]
    pub activity: ActivityClass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StalenessResponse {
    pub member_id: String,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordSyncRequest {
    pub team_id: String,
    #[serde(default)]
    pub observed_versions: BTreeMap<String, Version>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStateEnvelope {
    pub sync_state: SyncState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaggingEnvelope {
    pub items: Vec<LaggingEntity>,
}
