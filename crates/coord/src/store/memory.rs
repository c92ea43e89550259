// In-process graph store for local runs and tests.
//
// Each entity's compare-and-set runs inside its own DashMap entry guard, so
// racing writers on one entity serialize while other entities stay parallel.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use teamgraph_common::types::{Entity, Version};

use super::{CasOutcome, CasWrite, GraphStore};
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    entities: DashMap<String, Entity>,
    latest_change: DashMap<String, DateTime<Utc>>,
    offline: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert or replace an entity directly, bypassing version checks.
    pub fn seed(&self, entity: Entity) {
        self.bump_latest_change(&entity.team_id, entity.last_modified);
        self.entities.insert(entity.entity_id.clone(), entity);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }

    fn bump_latest_change(&self, team_id: &str, at: DateTime<Utc>) {
        self.latest_change
            .entry(team_id.to_owned())
            .and_modify(|latest| {
                if *latest < at {
                    *latest = at;
                }
            })
            .or_insert(at);
    }
}

impl GraphStore for MemoryGraphStore {
    async fn get_version(&self, entity_id: &str) -> Result<Version, StoreError> {
        self.ensure_online()?;
        Ok(self.entities.get(entity_id).map(|entity| entity.version).unwrap_or(0))
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, StoreError> {
        self.ensure_online()?;
        Ok(self.entities.get(entity_id).map(|entity| entity.clone()))
    }

    async fn compare_and_set(&self, write: CasWrite<'_>) -> Result<CasOutcome, StoreError> {
        self.ensure_online()?;

        let outcome = match self.entities.entry(write.entity_id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let entity = occupied.get_mut();
                if entity.team_id != write.team_id {
                    return Err(StoreError::team_mismatch(entity, write.team_id));
                }
                if entity.version != write.expected_version {
                    CasOutcome::Rejected { current: Some(entity.clone()) }
                } else {
                    entity.version += 1;
                    entity.content = write.content.clone();
                    entity.last_modified = write.at;
                    entity.last_modified_by = write.author_id.to_owned();
                    CasOutcome::Applied { new_version: entity.version, committed_at: write.at }
                }
            }
            Entry::Vacant(vacant) => {
                if write.expected_version != 0 {
                    CasOutcome::Rejected { current: None }
                } else {
                    vacant.insert(Entity {
                        entity_id: write.entity_id.to_owned(),
                        team_id: write.team_id.to_owned(),
                        version: 1,
                        content: write.content.clone(),
                        last_modified: write.at,
                        last_modified_by: write.author_id.to_owned(),
                    });
                    CasOutcome::Applied { new_version: 1, committed_at: write.at }
                }
            }
        };

        if matches!(outcome, CasOutcome::Applied { .. }) {
            self.bump_latest_change(write.team_id, write.at);
        }

        Ok(outcome)
    }

    async fn get_latest_change_time(
        &self,
        team_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.ensure_online()?;
        Ok(self.latest_change.get(team_id).map(|latest| *latest))
    }
}
