// Error taxonomy for the coordination subsystem.
//
// Version conflicts are not errors: they are returned as values
// (`CommitOutcome::Conflict`) so they can never be dropped by `?`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Failures talking to the graph store. `Unavailable` is the only class that
/// aborts an operation; nothing in this crate retries it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("graph store returned malformed data: {0}")]
    Corrupt(String),
    /// The write named a team other than the one owning the stored entity.
    #[error("entity `{entity_id}` belongs to team `{owner_team_id}`, not `{team_id}`")]
    TeamMismatch { entity_id: String, owner_team_id: String, team_id: String },
}

impl StoreError {
    pub fn team_mismatch(entity: &teamgraph_common::types::Entity, team_id: &str) -> Self {
        Self::TeamMismatch {
            entity_id: entity.entity_id.clone(),
            owner_team_id: entity.team_id.clone(),
            team_id: team_id.to_owned(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => Self::Corrupt(error.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("entity `{entity_id}` is locked by `{holder_id}` until {expires_at}")]
    AlreadyLocked { entity_id: String, holder_id: String, expires_at: DateTime<Utc> },
    #[error("lock on `{entity_id}` expired or is no longer held by this token")]
    LockExpiredOrNotHeld { entity_id: String },
    #[error("token is not the last lock issued for `{entity_id}`")]
    NotHolder { entity_id: String },
    #[error("lock on `{entity_id}` was issued non-renewable")]
    NotRenewable { entity_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("invalid resolution strategy: {0}")]
    InvalidStrategy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by [`crate::coordinator::Collaboration`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no pending conflict `{0}`")]
    ConflictNotFound(Uuid),
    #[error("{0}")]
    Validation(String),
}

impl CoordError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
