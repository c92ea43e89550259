// Version store adapter: the boundary to the external graph store.
//
// The store owns entity content and version stamps. This crate only reads
// versions and writes through `compare_and_set`, which must be atomic.

pub mod memory;
pub mod postgres;

use std::future::Future;

use chrono::{DateTime, Utc};
use teamgraph_common::types::{Entity, Version};

use crate::error::StoreError;

pub use memory::MemoryGraphStore;
pub use postgres::PgGraphStore;

/// A conditional write: apply only if the stored version equals
/// `expected_version` (0 = entity must not exist yet) and an existing entity
/// belongs to `team_id`.
#[derive(Debug, Clone, Copy)]
pub struct CasWrite<'a> {
    pub team_id: &'a str,
    pub entity_id: &'a str,
    pub expected_version: Version,
    pub content: &'a serde_json::Value,
    pub author_id: &'a str,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    Applied { new_version: Version, committed_at: DateTime<Utc> },
    /// The stored version differed. `current` is the stored entity, if any.
    Rejected { current: Option<Entity> },
}

impl CasOutcome {
    pub fn current_version(current: &Option<Entity>) -> Version {
        current.as_ref().map(|entity| entity.version).unwrap_or(0)
    }
}

pub trait GraphStore: Send + Sync + 'static {
    /// Current version of an entity; 0 when it does not exist.
    fn get_version(
        &self,
        entity_id: &str,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;

    fn get_entity(
        &self,
        entity_id: &str,
    ) -> impl Future<Output = Result<Option<Entity>, StoreError>> + Send;

    /// Atomic compare-and-increment. Two racing writes with the same expected
    /// version must yield exactly one `Applied`. A write naming a team other
    /// than the stored owner fails with `StoreError::TeamMismatch`, whatever
    /// its expected version.
    fn compare_and_set(
        &self,
        write: CasWrite<'_>,
    ) -> impl Future<Output = Result<CasOutcome, StoreError>> + Send;

    /// Timestamp of the most recent committed write in a team, if any.
    fn get_latest_change_time(
        &self,
        team_id: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, StoreError>> + Send;
}

/// Runtime-selected store: Postgres in deployments, memory for local runs
/// and tests.
#[derive(Debug, Clone)]
pub enum GraphBackend {
    Memory(std::sync::Arc<MemoryGraphStore>),
    Postgres(PgGraphStore),
}

impl GraphStore for GraphBackend {
    async fn get_version(&self, entity_id: &str) -> Result<Version, StoreError> {
        match self {
            Self::Memory(store) => store.get_version(entity_id).await,
            Self::Postgres(store) => store.get_version(entity_id).await,
        }
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, StoreError> {
        match self {
            Self::Memory(store) => store.get_entity(entity_id).await,
            Self::Postgres(store) => store.get_entity(entity_id).await,
        }
    }

    async fn compare_and_set(&self, write: CasWrite<'_>) -> Result<CasOutcome, StoreError> {
        match self {
            Self::Memory(store) => store.compare_and_set(write).await,
            Self::Postgres(store) => store.compare_and_set(write).await,
        }
    }

    async fn get_latest_change_time(
        &self,
        team_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self {
            Self::Memory(store) => store.get_latest_change_time(team_id).await,
            Self::Postgres(store) => store.get_latest_change_time(team_id).await,
        }
    }
}
