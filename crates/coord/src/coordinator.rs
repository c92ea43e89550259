// Facade the relay talks to: one shared instance per process.
//
// Wires the lock manager, conflict detector, merge resolver and staleness
// detector to a single store, clock and notification sink, and keeps the
// log of conflicts waiting for a decision.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use teamgraph_common::protocol::http::CommitRequest;
use teamgraph_common::types::{
    ActivityClass, ConflictRecord, Freshness, LaggingEntity, LockToken, ResolutionStrategy,
    SyncState, Version,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::CoordConfig;
use crate::conflict::{CommitInput, CommitOutcome, ConflictDetector, ConflictLog};
use crate::error::{CoordError, LockError, StoreError};
use crate::lock::{LockManager, ReleaseOutcome};
use crate::merge::{MergeResolver, Resolution, ResolveOutcome, Resolved};
use crate::notify::NotificationSink;
use crate::staleness::StalenessDetector;
use crate::store::GraphStore;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitReport {
    Committed { entity_id: String, new_version: Version, committed_at: DateTime<Utc> },
    /// The save conflicted and `on_conflict` settled it in the same call.
    Resolved(Resolved),
    /// The save conflicted and was parked for a later decision.
    Conflict(ConflictRecord),
}

#[derive(Debug)]
pub struct Collaboration<S> {
    locks: LockManager<S>,
    detector: ConflictDetector<S>,
    resolver: MergeResolver<S>,
    staleness: StalenessDetector<S>,
    conflicts: ConflictLog,
}

impl<S: GraphStore> Collaboration<S> {
    pub fn new(
        store: Arc<S>,
        config: CoordConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let CoordConfig { locks, staleness } = config;
        Self {
            locks: LockManager::new(Arc::clone(&store), locks, Arc::clone(&clock), sink),
            detector: ConflictDetector::new(Arc::clone(&store), Arc::clone(&clock)),
            resolver: MergeResolver::new(Arc::clone(&store), Arc::clone(&clock)),
            staleness: StalenessDetector::new(store, staleness, clock),
            conflicts: ConflictLog::new(),
        }
    }

    // ── Locks ──────────────────────────────────────────────────────────

    pub async fn acquire_lock(&self, entity_id: &str, holder_id: &str) -> Result<LockToken, CoordError> {
        require("entity_id", entity_id)?;
        require("holder_id", holder_id)?;
        Ok(self.locks.acquire(entity_id, holder_id).await.inspect_err(log_lock_store_failure)?)
    }

    pub async fn renew_lock(&self, token: &LockToken) -> Result<LockToken, CoordError> {
        Ok(self.locks.renew(token).await?)
    }

    pub async fn release_lock(&self, token: &LockToken) -> Result<ReleaseOutcome, CoordError> {
        Ok(self.locks.release(token).await?)
    }

    pub fn lock_holder(&self, entity_id: &str) -> Option<LockToken> {
        self.locks.holder(entity_id)
    }

    // ── Commits and conflicts ──────────────────────────────────────────

    /// Commit a save made from `expected_version`.
    ///
    /// On success the presented lock (if any) is released and the author's
    /// version vector advances. On conflict the record is either resolved
    /// right away with `on_conflict` or parked in the conflict log.
    pub async fn commit(&self, entity_id: &str, request: CommitRequest) -> Result<CommitReport, CoordError> {
        require("entity_id", entity_id)?;
        require("team_id", &request.team_id)?;
        require("author_id", &request.author_id)?;
        if let Some(lock) = &request.lock {
            if lock.entity_id != entity_id {
                return Err(CoordError::validation(format!(
                    "lock is for `{}`, not `{entity_id}`",
                    lock.entity_id
                )));
            }
        }
        let on_conflict = match request.on_conflict {
            Some(strategy) => Some(Resolution::from_request(strategy, None)?),
            None => None,
        };

        let author_id = request.author_id.clone();
        let outcome = self
            .detector
            .check_and_commit(CommitInput {
                team_id: request.team_id,
                entity_id: entity_id.to_owned(),
                expected_version: request.expected_version,
                content: request.content,
                author_id: request.author_id,
            })
            .await
            .inspect_err(log_store_failure)?;

        match outcome {
            CommitOutcome::Committed { entity_id, new_version, committed_at } => {
                self.staleness.record_save(&author_id, &entity_id, new_version);
                self.release_after_commit(request.lock.as_ref()).await;
                Ok(CommitReport::Committed { entity_id, new_version, committed_at })
            }
            CommitOutcome::Conflict(record) => match on_conflict {
                Some(resolution) => {
                    let resolved = self.settle(record, resolution, request.lock.as_ref()).await?;
                    Ok(CommitReport::Resolved(resolved))
                }
                None => {
                    self.conflicts.park(record.clone());
                    Ok(CommitReport::Conflict(record))
                }
            },
        }
    }

    /// Apply a strategy to a parked conflict. The record leaves the log
    /// unless the store fails before a decision is made.
    pub async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        merged_content: Option<serde_json::Value>,
    ) -> Result<Resolved, CoordError> {
        let resolution = Resolution::from_request(strategy, merged_content)?;
        let record = self
            .conflicts
            .take(conflict_id)
            .ok_or(CoordError::ConflictNotFound(conflict_id))?;

        self.settle(record, resolution, None).await
    }

    pub fn pending_conflicts(&self, team_id: &str) -> Vec<ConflictRecord> {
        self.conflicts.list_for_team(team_id)
    }

    pub fn pending_conflict(&self, conflict_id: Uuid) -> Option<ConflictRecord> {
        self.conflicts.get(conflict_id)
    }

    // ── Staleness ──────────────────────────────────────────────────────

    pub async fn check_staleness(
        &self,
        member_id: &str,
        activity: ActivityClass,
    ) -> Result<Freshness, CoordError> {
        require("member_id", member_id)?;
        Ok(self
            .staleness
            .check_staleness(member_id, activity)
            .await
            .inspect_err(log_store_failure)?)
    }

    pub fn record_sync(
        &self,
        member_id: &str,
        team_id: &str,
        observed_versions: BTreeMap<String, Version>,
    ) -> Result<SyncState, CoordError> {
        require("member_id", member_id)?;
        require("team_id", team_id)?;
        Ok(self.staleness.record_sync(member_id, team_id, observed_versions))
    }

    pub async fn lagging_entities(&self, member_id: &str) -> Result<Vec<LaggingEntity>, CoordError> {
        Ok(self.staleness.lagging_entities(member_id).await.inspect_err(log_store_failure)?)
    }

    pub fn sync_state(&self, member_id: &str) -> Option<SyncState> {
        self.staleness.sync_state(member_id)
    }

    // ── Internals ──────────────────────────────────────────────────────

    async fn settle(
        &self,
        record: ConflictRecord,
        resolution: Resolution,
        lock: Option<&LockToken>,
    ) -> Result<Resolved, CoordError> {
        let parked = record.clone();
        let resolved = match self.resolver.resolve(record, resolution).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(
                    conflict_id = %parked.conflict_id,
                    entity_id = %parked.entity_id,
                    error = %err,
                    "conflict resolution failed; keeping it pending"
                );
                self.conflicts.park(parked);
                return Err(err.into());
            }
        };

        match &resolved.outcome {
            ResolveOutcome::Committed { entity_id, new_version } => {
                self.staleness.record_save(&resolved.record.author_id, entity_id, *new_version);
                self.release_after_commit(lock).await;
            }
            ResolveOutcome::KeptTheirs { entity_id, version, .. } => {
                self.staleness.record_save(&resolved.record.author_id, entity_id, *version);
                self.release_after_commit(lock).await;
            }
            ResolveOutcome::Conflict(next) => self.conflicts.park(next.clone()),
        }

        Ok(resolved)
    }

    /// The write already committed, so a lock that was lost in the meantime
    /// is only worth a log line.
    async fn release_after_commit(&self, lock: Option<&LockToken>) {
        let Some(token) = lock else {
            return;
        };
        match self.locks.release(token).await {
            Ok(ReleaseOutcome::Released) => {}
            Ok(ReleaseOutcome::AlreadyInactive) => debug!(
                entity_id = %token.entity_id,
                holder_id = %token.holder_id,
                "lock already inactive at commit"
            ),
            Err(err) => debug!(
                entity_id = %token.entity_id,
                holder_id = %token.holder_id,
                error = %err,
                "lock not released at commit"
            ),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), CoordError> {
    if value.trim().is_empty() {
        return Err(CoordError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn log_store_failure(error: &StoreError) {
    warn!(error = %error, "graph store call failed");
}

fn log_lock_store_failure(error: &LockError) {
    if let LockError::Store(store) = error {
        log_store_failure(store);
    }
}
