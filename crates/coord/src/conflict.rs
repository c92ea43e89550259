// Optimistic-concurrency commits and the log of unresolved conflicts.
//
// A commit is one compare-and-set against the store. A mismatched version is
// reported as a `ConflictRecord` value; nothing is written in that case.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use teamgraph_common::types::{ConflictRecord, Version};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{CasOutcome, CasWrite, GraphStore};

/// A member's proposed write, stamped with the version they started from.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInput {
    pub team_id: String,
    pub entity_id: String,
    pub expected_version: Version,
    pub content: serde_json::Value,
    pub author_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed { entity_id: String, new_version: Version, committed_at: DateTime<Utc> },
    Conflict(ConflictRecord),
}

impl CommitOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[derive(Debug)]
pub struct ConflictDetector<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for ConflictDetector<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), clock: Arc::clone(&self.clock) }
    }
}

impl<S: GraphStore> ConflictDetector<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Commit iff the stored version still equals `expected_version`.
    ///
    /// Of two writers racing from the same version, exactly one commits and
    /// the other receives a conflict carrying the winner's version.
    pub async fn check_and_commit(&self, input: CommitInput) -> Result<CommitOutcome, StoreError> {
        let now = self.clock.now();
        let outcome = self
            .store
            .compare_and_set(CasWrite {
                team_id: &input.team_id,
                entity_id: &input.entity_id,
                expected_version: input.expected_version,
                content: &input.content,
                author_id: &input.author_id,
                at: now,
            })
            .await?;

        match outcome {
            CasOutcome::Applied { new_version, committed_at } => {
                debug!(
                    entity_id = %input.entity_id,
                    author_id = %input.author_id,
                    new_version,
                    "entity committed"
                );
                Ok(CommitOutcome::Committed { entity_id: input.entity_id, new_version, committed_at })
            }
            CasOutcome::Rejected { current } => {
                let current_version = CasOutcome::current_version(&current);
                let remote_change =
                    current.map(|entity| entity.content).unwrap_or(serde_json::Value::Null);
                info!(
                    entity_id = %input.entity_id,
                    author_id = %input.author_id,
                    base_version = input.expected_version,
                    current_version,
                    "version conflict"
                );
                Ok(CommitOutcome::Conflict(ConflictRecord {
                    conflict_id: Uuid::new_v4(),
                    team_id: input.team_id,
                    entity_id: input.entity_id,
                    base_version: input.expected_version,
                    current_version,
                    local_change: input.content,
                    remote_change,
                    author_id: input.author_id,
                    detected_at: now,
                    resolution_strategy: None,
                    resolved_at: None,
                }))
            }
        }
    }
}

/// Conflicts waiting for their author to choose a resolution.
#[derive(Debug, Default)]
pub struct ConflictLog {
    pending: DashMap<Uuid, ConflictRecord>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self, record: ConflictRecord) {
        self.pending.insert(record.conflict_id, record);
    }

    pub fn get(&self, conflict_id: Uuid) -> Option<ConflictRecord> {
        self.pending.get(&conflict_id).map(|record| record.clone())
    }

    /// Remove a record so exactly one caller can resolve it.
    pub fn take(&self, conflict_id: Uuid) -> Option<ConflictRecord> {
        self.pending.remove(&conflict_id).map(|(_, record)| record)
    }

    /// Pending conflicts for a team, oldest first.
    pub fn list_for_team(&self, team_id: &str) -> Vec<ConflictRecord> {
        let mut items: Vec<ConflictRecord> = self
            .pending
            .iter()
            .filter(|entry| entry.team_id == team_id)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| {
            a.detected_at.cmp(&b.detected_at).then_with(|| a.conflict_id.cmp(&b.conflict_id))
        });
        items
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{CommitInput, CommitOutcome, ConflictDetector, ConflictLog};
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::store::{GraphStore, MemoryGraphStore};

    fn ts(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp should be valid")
    }

    fn input(expected_version: u64, author_id: &str, content: serde_json::Value) -> CommitInput {
        CommitInput {
            team_id: "team-1".into(),
            entity_id: "E2".into(),
            expected_version,
            content,
            author_id: author_id.into(),
        }
    }

    fn detector() -> (ConflictDetector<MemoryGraphStore>, Arc<MemoryGraphStore>, ManualClock) {
        let store = Arc::new(MemoryGraphStore::new());
        let clock = ManualClock::new(ts(1_700_000_000));
        (ConflictDetector::new(Arc::clone(&store), Arc::new(clock.clone())), store, clock)
    }

    #[tokio::test]
    async fn matching_version_commits_and_increments() {
        let (detector, store, _) = detector();

        let first = detector.check_and_commit(input(0, "ana", json!("v1"))).await.expect("commit");
        let second = detector.check_and_commit(input(1, "ana", json!("v2"))).await.expect("commit");

        assert_eq!(
            second,
            CommitOutcome::Committed {
                entity_id: "E2".into(),
                new_version: 2,
                committed_at: ts(1_700_000_000),
            }
        );
        assert!(!first.is_conflict());
        assert_eq!(store.get_version("E2").await.expect("read"), 2);
    }

    #[tokio::test]
    async fn stale_version_yields_conflict_without_writing() {
        let (detector, store, clock) = detector();
        detector.check_and_commit(input(0, "ana", json!({ "status": "open" }))).await.expect("seed");

        clock.advance(Duration::seconds(30));
        let outcome = detector
            .check_and_commit(input(0, "ben", json!({ "status": "closed" })))
            .await
            .expect("commit");

        let CommitOutcome::Conflict(record) = outcome else {
            panic!("expected a conflict");
        };
        assert_eq!(record.base_version, 0);
        assert_eq!(record.current_version, 1);
        assert_eq!(record.local_change, json!({ "status": "closed" }));
        assert_eq!(record.remote_change, json!({ "status": "open" }));
        assert_eq!(record.author_id, "ben");
        assert_eq!(record.detected_at, ts(1_700_000_030));
        assert!(!record.is_resolved());

        let stored = store.get_entity("E2").await.expect("read").expect("exists");
        assert_eq!(stored.content, json!({ "status": "open" }));
    }

    #[tokio::test]
    async fn store_outage_aborts_commit() {
        let (detector, store, _) = detector();
        store.set_offline(true);

        let err = detector
            .check_and_commit(input(0, "ana", json!("v1")))
            .await
            .expect_err("commit should fail");

        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn log_take_hands_out_each_record_once() {
        let (detector, _, _) = detector();
        detector.check_and_commit(input(0, "ana", json!("v1"))).await.expect("seed");
        let CommitOutcome::Conflict(record) =
            detector.check_and_commit(input(0, "ben", json!("v2"))).await.expect("commit")
        else {
            panic!("expected a conflict");
        };
        let log = ConflictLog::new();
        log.park(record.clone());

        assert_eq!(log.get(record.conflict_id), Some(record.clone()));
        assert_eq!(log.take(record.conflict_id), Some(record.clone()));
        assert_eq!(log.take(record.conflict_id), None);
        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn log_lists_by_team_oldest_first() {
        let (detector, _, clock) = detector();
        detector.check_and_commit(input(0, "ana", json!("v1"))).await.expect("seed");
        let log = ConflictLog::new();
        for author in ["ben", "cy"] {
            clock.advance(Duration::seconds(10));
            if let CommitOutcome::Conflict(record) =
                detector.check_and_commit(input(0, author, json!(author))).await.expect("commit")
            {
                log.park(record);
            }
        }

        let authors: Vec<String> =
            log.list_for_team("team-1").into_iter().map(|record| record.author_id).collect();
        assert_eq!(authors, vec!["ben".to_string(), "cy".to_string()]);
        assert!(log.list_for_team("team-2").is_empty());
    }
}
