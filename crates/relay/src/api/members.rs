use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use teamgraph_common::protocol::http::{
    LaggingEnvelope, RecordSyncRequest, StalenessQuery, StalenessResponse, SyncStateEnvelope,
};

use super::ApiState;
use crate::error::RelayError;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/members/{member_id}/staleness", get(get_staleness))
        .route("/v1/members/{member_id}/sync", post(record_sync))
        .route("/v1/members/{member_id}/lagging", get(get_lagging))
}

async fn get_staleness(
    State(state): State<ApiState>,
    Path(member_id): Path<String>,
    Query(query): Query<StalenessQuery>,
) -> Result<Json<StalenessResponse>, RelayError> {
    let freshness = state.collab.check_staleness(&member_id, query.activity).await?;
    Ok(Json(StalenessResponse { member_id, freshness }))
}

async fn record_sync(
    State(state): State<ApiState>,
    Path(member_id): Path<String>,
    Json(payload): Json<RecordSyncRequest>,
) -> Result<Json<SyncStateEnvelope>, RelayError> {
    let sync_state =
        state.collab.record_sync(&member_id, &payload.team_id, payload.observed_versions)?;
    Ok(Json(SyncStateEnvelope { sync_state }))
}

async fn get_lagging(
    State(state): State<ApiState>,
    Path(member_id): Path<String>,
) -> Result<Json<LaggingEnvelope>, RelayError> {
    let items = state.collab.lagging_entities(&member_id).await?;
    Ok(Json(LaggingEnvelope { items }))
}
