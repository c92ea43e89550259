// Versioned commits and conflict resolution.
//
// A conflict is a 409 whose details carry the full conflict record, so the
// client can show both bodies and pick a strategy without another request.

use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde_json::json;
use teamgraph_common::protocol::http::{
    CommitRequest, CommittedResponse, ConflictsEnvelope, ConflictsQuery, ResolutionResult,
    ResolveConflictRequest, ResolveConflictResponse,
};
use teamgraph_common::types::ConflictRecord;
use teamgraph_coord::merge::{ResolveOutcome, Resolved};
use teamgraph_coord::CommitReport;
use uuid::Uuid;

use super::ApiState;
use crate::error::{ErrorCode, RelayError};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/entities/{entity_id}/commit", post(commit_entity))
        .route("/v1/conflicts", get(list_conflicts))
        .route("/v1/conflicts/{conflict_id}/resolve", post(resolve_conflict))
}

async fn commit_entity(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
    Json(payload): Json<CommitRequest>,
) -> Result<Json<CommittedResponse>, RelayError> {
    match state.collab.commit(&entity_id, payload).await? {
        CommitReport::Committed { entity_id, new_version, committed_at } => {
            Ok(Json(CommittedResponse { entity_id, new_version, committed_at }))
        }
        CommitReport::Conflict(conflict) => Err(conflict_error(&conflict)),
        CommitReport::Resolved(resolved) => {
            let conflict = resolved.record.clone();
            let resolution = resolution_response(resolved);
            Err(conflict_error(&conflict).with_details(json!({
                "conflict": conflict,
                "resolution": resolution,
            })))
        }
    }
}

async fn resolve_conflict(
    State(state): State<ApiState>,
    Path(conflict_id): Path<Uuid>,
    Json(payload): Json<ResolveConflictRequest>,
) -> Result<Json<ResolveConflictResponse>, RelayError> {
    let resolved = state
        .collab
        .resolve_conflict(conflict_id, payload.strategy, payload.merged_content)
        .await?;

    let response = resolution_response(resolved);
    if let ResolutionResult::Conflict { conflict } = &response.result {
        return Err(conflict_error(conflict).with_details(json!({
            "conflict": conflict,
            "resolution": response,
        })));
    }
    Ok(Json(response))
}

async fn list_conflicts(
    State(state): State<ApiState>,
    Query(query): Query<ConflictsQuery>,
) -> Result<Json<ConflictsEnvelope>, RelayError> {
    if query.team_id.trim().is_empty() {
        return Err(RelayError::new(ErrorCode::ValidationFailed, "team_id must not be empty"));
    }
    Ok(Json(ConflictsEnvelope { items: state.collab.pending_conflicts(&query.team_id) }))
}

fn conflict_error(conflict: &ConflictRecord) -> RelayError {
    RelayError::new(
        ErrorCode::VersionConflict,
        format!(
            "`{}` is at version {}, save was based on version {}",
            conflict.entity_id, conflict.current_version, conflict.base_version
        ),
    )
    .with_details(json!({ "conflict": conflict }))
}

fn resolution_response(resolved: Resolved) -> ResolveConflictResponse {
    let Resolved { record, strategy, outcome, diff } = resolved;
    let result = match outcome {
        ResolveOutcome::Committed { entity_id, new_version } => {
            ResolutionResult::Committed { entity_id, new_version }
        }
        ResolveOutcome::KeptTheirs { entity_id, version, content } => {
            ResolutionResult::KeptTheirs { entity_id, version, content }
        }
        ResolveOutcome::Conflict(conflict) => ResolutionResult::Conflict { conflict },
    };
    ResolveConflictResponse {
        conflict_id: record.conflict_id,
        strategy,
        result,
        diff,
    }
}
