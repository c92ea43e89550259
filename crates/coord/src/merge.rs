// Applies a member's chosen strategy to a detected conflict.
//
// Writes go back through the conflict detector, so a resolution that races a
// third writer surfaces as a fresh conflict instead of overwriting it.

use std::sync::Arc;

use teamgraph_common::diff::{structural_diff, StructuralDiff};
use teamgraph_common::types::{ConflictRecord, ResolutionStrategy, Version};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::conflict::{CommitInput, CommitOutcome, ConflictDetector};
use crate::error::MergeError;
use crate::store::GraphStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    KeepMine,
    KeepTheirs,
    ManualMerge { merged: serde_json::Value },
}

impl Resolution {
    /// Validate a strategy and its optional merged body as sent by a client.
    pub fn from_request(
        strategy: ResolutionStrategy,
        merged: Option<serde_json::Value>,
    ) -> Result<Self, MergeError> {
        match (strategy, merged) {
            (ResolutionStrategy::ManualMerge, Some(merged)) => Ok(Self::ManualMerge { merged }),
            (ResolutionStrategy::ManualMerge, None) => Err(MergeError::InvalidStrategy(
                "manual_merge requires merged content".into(),
            )),
            (strategy, Some(_)) => Err(MergeError::InvalidStrategy(format!(
                "{} does not accept merged content",
                strategy.as_str()
            ))),
            (ResolutionStrategy::KeepMine, None) => Ok(Self::KeepMine),
            (ResolutionStrategy::KeepTheirs, None) => Ok(Self::KeepTheirs),
        }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        match self {
            Self::KeepMine => ResolutionStrategy::KeepMine,
            Self::KeepTheirs => ResolutionStrategy::KeepTheirs,
            Self::ManualMerge { .. } => ResolutionStrategy::ManualMerge,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Committed { entity_id: String, new_version: Version },
    KeptTheirs { entity_id: String, version: Version, content: serde_json::Value },
    /// Someone else committed between the re-read and the write.
    Conflict(ConflictRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// The input record, stamped with the strategy and resolution time unless
    /// the outcome is a fresh conflict.
    pub record: ConflictRecord,
    pub strategy: ResolutionStrategy,
    pub outcome: ResolveOutcome,
    /// Remote-to-local structural diff of the two conflicting bodies.
    pub diff: StructuralDiff,
}

#[derive(Debug)]
pub struct MergeResolver<S> {
    store: Arc<S>,
    detector: ConflictDetector<S>,
    clock: Arc<dyn Clock>,
}

impl<S: GraphStore> MergeResolver<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let detector = ConflictDetector::new(Arc::clone(&store), Arc::clone(&clock));
        Self { store, detector, clock }
    }

    pub async fn resolve(
        &self,
        conflict: ConflictRecord,
        resolution: Resolution,
    ) -> Result<Resolved, MergeError> {
        if conflict.is_resolved() {
            return Err(MergeError::InvalidStrategy(format!(
                "conflict {} is already resolved",
                conflict.conflict_id
            )));
        }

        let diff = structural_diff(&conflict.remote_change, &conflict.local_change);
        debug!(
            conflict_id = %conflict.conflict_id,
            entity_id = %conflict.entity_id,
            changes = diff.change_count(),
            ?diff,
            "conflict diff"
        );

        let strategy = resolution.strategy();
        let outcome = match resolution {
            Resolution::KeepTheirs => {
                let current = self.store.get_entity(&conflict.entity_id).await?;
                let (version, content) = match current {
                    Some(entity) => (entity.version, entity.content),
                    None => (0, serde_json::Value::Null),
                };
                ResolveOutcome::KeptTheirs { entity_id: conflict.entity_id.clone(), version, content }
            }
            Resolution::KeepMine => self.write_over(&conflict, conflict.local_change.clone()).await?,
            Resolution::ManualMerge { merged } => self.write_over(&conflict, merged).await?,
        };

        info!(
            conflict_id = %conflict.conflict_id,
            entity_id = %conflict.entity_id,
            strategy = strategy.as_str(),
            reconflicted = matches!(outcome, ResolveOutcome::Conflict(_)),
            "conflict resolved"
        );

        // A re-conflict leaves the record open; its successor carries on.
        let mut record = conflict;
        if !matches!(outcome, ResolveOutcome::Conflict(_)) {
            record.resolution_strategy = Some(strategy);
            record.resolved_at = Some(self.clock.now());
        }

        Ok(Resolved { record, strategy, outcome, diff })
    }

    /// Commit `content` against whatever version is stored right now.
    async fn write_over(
        &self,
        conflict: &ConflictRecord,
        content: serde_json::Value,
    ) -> Result<ResolveOutcome, MergeError> {
        let expected_version = self.store.get_version(&conflict.entity_id).await?;
        let outcome = self
            .detector
            .check_and_commit(CommitInput {
                team_id: conflict.team_id.clone(),
                entity_id: conflict.entity_id.clone(),
                expected_version,
                content,
                author_id: conflict.author_id.clone(),
            })
            .await?;

        Ok(match outcome {
            CommitOutcome::Committed { entity_id, new_version, .. } => {
                ResolveOutcome::Committed { entity_id, new_version }
            }
            CommitOutcome::Conflict(record) => ResolveOutcome::Conflict(record),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use teamgraph_common::diff::StructuralDiff;
    use teamgraph_common::types::{ConflictRecord, Entity, ResolutionStrategy, Version};

    use super::{MergeResolver, Resolution, ResolveOutcome};
    use crate::clock::ManualClock;
    use crate::conflict::{CommitInput, CommitOutcome, ConflictDetector};
    use crate::error::{MergeError, StoreError};
    use crate::store::{CasOutcome, CasWrite, GraphStore, MemoryGraphStore};

    fn ts(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp should be valid")
    }

    /// Reports every version one behind, as if another writer committed right
    /// after each read.
    #[derive(Debug, Default)]
    struct LaggingReads(MemoryGraphStore);

    impl GraphStore for LaggingReads {
        async fn get_version(&self, entity_id: &str) -> Result<Version, StoreError> {
            Ok(self.0.get_version(entity_id).await?.saturating_sub(1))
        }

        async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, StoreError> {
            self.0.get_entity(entity_id).await
        }

        async fn compare_and_set(&self, write: CasWrite<'_>) -> Result<CasOutcome, StoreError> {
            self.0.compare_and_set(write).await
        }

        async fn get_latest_change_time(
            &self,
            team_id: &str,
        ) -> Result<Option<chrono::DateTime<Utc>>, StoreError> {
            self.0.get_latest_change_time(team_id).await
        }
    }

    struct Harness {
        resolver: MergeResolver<MemoryGraphStore>,
        detector: ConflictDetector<MemoryGraphStore>,
        store: Arc<MemoryGraphStore>,
        clock: ManualClock,
    }

    fn setup() -> Harness {
        let store = Arc::new(MemoryGraphStore::new());
        let clock = ManualClock::new(ts(1_700_000_000));
        let resolver = MergeResolver::new(Arc::clone(&store), Arc::new(clock.clone()));
        let detector = ConflictDetector::new(Arc::clone(&store), Arc::new(clock.clone()));
        Harness { resolver, detector, store, clock }
    }

    fn commit(author_id: &str, expected_version: u64, content: serde_json::Value) -> CommitInput {
        CommitInput {
            team_id: "team-1".into(),
            entity_id: "E2".into(),
            expected_version,
            content,
            author_id: author_id.into(),
        }
    }

    /// Ana commits v1, then Ben's save from version 0 conflicts.
    async fn conflicted(h: &Harness) -> ConflictRecord {
        h.detector
            .check_and_commit(commit("ana", 0, json!({ "title": "Cache", "status": "open" })))
            .await
            .expect("seed commit");
        match h
            .detector
            .check_and_commit(commit("ben", 0, json!({ "title": "Cache", "status": "closed" })))
            .await
            .expect("second commit")
        {
            CommitOutcome::Conflict(record) => record,
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn request_validation() {
        assert_eq!(
            Resolution::from_request(ResolutionStrategy::KeepMine, None),
            Ok(Resolution::KeepMine)
        );
        assert_eq!(
            Resolution::from_request(ResolutionStrategy::ManualMerge, Some(json!("x"))),
            Ok(Resolution::ManualMerge { merged: json!("x") })
        );
        assert!(matches!(
            Resolution::from_request(ResolutionStrategy::ManualMerge, None),
            Err(MergeError::InvalidStrategy(_))
        ));
        assert!(matches!(
            Resolution::from_request(ResolutionStrategy::KeepTheirs, Some(json!("x"))),
            Err(MergeError::InvalidStrategy(_))
        ));
    }

    #[tokio::test]
    async fn keep_theirs_returns_stored_state_without_writing() {
        let h = setup();
        let record = conflicted(&h).await;

        let resolved = h.resolver.resolve(record, Resolution::KeepTheirs).await.expect("resolve");

        assert_eq!(
            resolved.outcome,
            ResolveOutcome::KeptTheirs {
                entity_id: "E2".into(),
                version: 1,
                content: json!({ "title": "Cache", "status": "open" }),
            }
        );
        let stored = h.store.get_entity("E2").await.expect("read").expect("exists");
        assert_eq!(stored.version, 1);
        assert_eq!(stored.last_modified_by, "ana");
    }

    #[tokio::test]
    async fn keep_mine_writes_local_content_at_next_version() {
        let h = setup();
        let record = conflicted(&h).await;
        h.clock.advance(Duration::minutes(2));

        let resolved = h.resolver.resolve(record, Resolution::KeepMine).await.expect("resolve");

        assert_eq!(
            resolved.outcome,
            ResolveOutcome::Committed { entity_id: "E2".into(), new_version: 2 }
        );
        assert_eq!(resolved.record.resolution_strategy, Some(ResolutionStrategy::KeepMine));
        assert_eq!(resolved.record.resolved_at, Some(ts(1_700_000_120)));
        let stored = h.store.get_entity("E2").await.expect("read").expect("exists");
        assert_eq!(stored.content["status"], "closed");
        assert_eq!(stored.last_modified_by, "ben");
    }

    #[tokio::test]
    async fn manual_merge_commits_supplied_body() {
        let h = setup();
        let record = conflicted(&h).await;
        let merged = json!({ "title": "Cache", "status": "blocked" });

        let resolved = h
            .resolver
            .resolve(record, Resolution::ManualMerge { merged: merged.clone() })
            .await
            .expect("resolve");

        assert!(matches!(resolved.outcome, ResolveOutcome::Committed { new_version: 2, .. }));
        let stored = h.store.get_entity("E2").await.expect("read").expect("exists");
        assert_eq!(stored.content, merged);
    }

    #[tokio::test]
    async fn reconflict_leaves_the_record_unresolved() {
        let store = Arc::new(LaggingReads::default());
        let clock = ManualClock::new(ts(1_700_000_000));
        let detector = ConflictDetector::new(Arc::clone(&store), Arc::new(clock.clone()));
        let resolver = MergeResolver::new(Arc::clone(&store), Arc::new(clock.clone()));
        detector.check_and_commit(commit("ana", 0, json!("ana v1"))).await.expect("seed commit");
        let CommitOutcome::Conflict(record) =
            detector.check_and_commit(commit("ben", 0, json!("ben v1"))).await.expect("commit")
        else {
            panic!("expected a conflict");
        };

        let resolved = resolver.resolve(record, Resolution::KeepMine).await.expect("resolve");

        let ResolveOutcome::Conflict(next) = &resolved.outcome else {
            panic!("expected a fresh conflict, got {:?}", resolved.outcome);
        };
        assert_eq!((next.base_version, next.current_version), (0, 1));
        assert!(!next.is_resolved());
        assert_eq!(resolved.strategy, ResolutionStrategy::KeepMine);
        assert_eq!(resolved.record.resolution_strategy, None);
        assert_eq!(resolved.record.resolved_at, None);
        assert_eq!(store.0.get_version("E2").await.expect("read"), 1);
    }

    #[tokio::test]
    async fn diff_is_field_level_for_objects() {
        let h = setup();
        let record = conflicted(&h).await;

        let resolved = h.resolver.resolve(record, Resolution::KeepTheirs).await.expect("resolve");

        let StructuralDiff::Fields { changes } = resolved.diff else {
            panic!("expected a field diff");
        };
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "status");
    }

    #[tokio::test]
    async fn already_resolved_record_is_rejected() {
        let h = setup();
        let record = conflicted(&h).await;
        let resolved = h.resolver.resolve(record, Resolution::KeepTheirs).await.expect("resolve");

        let err = h
            .resolver
            .resolve(resolved.record, Resolution::KeepMine)
            .await
            .expect_err("second resolution should fail");

        assert!(matches!(err, MergeError::InvalidStrategy(_)));
        assert_eq!(h.store.get_version("E2").await.expect("read"), 1);
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_store_error() {
        let h = setup();
        let record = conflicted(&h).await;
        h.store.set_offline(true);

        let err = h.resolver.resolve(record, Resolution::KeepMine).await.expect_err("should fail");

        assert_eq!(err, MergeError::Store(StoreError::Unavailable("memory store is offline".into())));
    }
}
