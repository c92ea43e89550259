// Advisory "your view may be out of date" checks.
//
// Staleness is scalar: a member is stale when their last sync is older than
// the activity threshold and the team has changed since. Members who never
// synced are reported separately so callers can prompt an initial sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use teamgraph_common::types::{ActivityClass, Freshness, LaggingEntity, SyncState, Version};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::StalenessConfig;
use crate::error::StoreError;
use crate::store::GraphStore;

#[derive(Debug)]
pub struct StalenessDetector<S> {
    store: Arc<S>,
    states: DashMap<String, SyncState>,
    config: StalenessConfig,
    clock: Arc<dyn Clock>,
}

impl<S: GraphStore> StalenessDetector<S> {
    pub fn new(store: Arc<S>, config: StalenessConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, states: DashMap::new(), config, clock }
    }

    /// Mark a member as synced now and merge the versions they observed.
    pub fn record_sync(
        &self,
        member_id: &str,
        team_id: &str,
        observed_versions: BTreeMap<String, Version>,
    ) -> SyncState {
        let now = self.clock.now();
        let mut state = self
            .states
            .entry(member_id.to_owned())
            .or_insert_with(|| SyncState {
                member_id: member_id.to_owned(),
                team_id: team_id.to_owned(),
                last_synced_at: now,
                last_synced_version_vector: BTreeMap::new(),
            });
        state.team_id = team_id.to_owned();
        if state.last_synced_at < now {
            state.last_synced_at = now;
        }
        state.observe(observed_versions);
        debug!(member_id, team_id, watched = state.last_synced_version_vector.len(), "member synced");
        state.clone()
    }

    /// A member's own commit means they have seen that version. Does not count
    /// as a sync of the rest of the team's graph.
    pub fn record_save(&self, member_id: &str, entity_id: &str, version: Version) {
        if let Some(mut state) = self.states.get_mut(member_id) {
            state.observe([(entity_id.to_owned(), version)]);
        }
    }

    pub fn sync_state(&self, member_id: &str) -> Option<SyncState> {
        self.states.get(member_id).map(|state| state.clone())
    }

    /// Pure read: the same clock reading with no intervening sync or commit
    /// yields the same answer.
    pub async fn check_staleness(
        &self,
        member_id: &str,
        activity: ActivityClass,
    ) -> Result<Freshness, StoreError> {
        let threshold_seconds = self.config.threshold_for(activity);
        let Some(state) = self.sync_state(member_id) else {
            return Ok(Freshness::NeverSynced { threshold_seconds });
        };

        let age_seconds = age_seconds(state.last_synced_at, self.clock.now());
        if age_seconds <= threshold_seconds {
            return Ok(Freshness::Fresh);
        }

        let latest_change = self.store.get_latest_change_time(&state.team_id).await?;
        if !latest_change.is_some_and(|latest| latest > state.last_synced_at) {
            return Ok(Freshness::Fresh);
        }

        warn!(member_id, team_id = %state.team_id, age_seconds, threshold_seconds, "member view is stale");
        Ok(Freshness::Stale { age_seconds, threshold_seconds })
    }

    /// Watched entities whose stored version moved past what the member saw.
    /// Unknown members have nothing watched.
    pub async fn lagging_entities(&self, member_id: &str) -> Result<Vec<LaggingEntity>, StoreError> {
        let Some(state) = self.sync_state(member_id) else {
            return Ok(Vec::new());
        };

        let mut lagging = Vec::new();
        for (entity_id, observed_version) in state.last_synced_version_vector {
            let current_version = self.store.get_version(&entity_id).await?;
            if current_version > observed_version {
                lagging.push(LaggingEntity { entity_id, observed_version, current_version });
            }
        }
        Ok(lagging)
    }
}

fn age_seconds(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_seconds()).unwrap_or(0)
}
