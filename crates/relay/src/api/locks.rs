// Edit-lock endpoints: acquire, renew, release and "who is editing".

use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use teamgraph_common::protocol::http::{
    AcquireLockRequest, LockEnvelope, LockHolderEnvelope, LockTokenRequest, ReleaseLockResponse,
    ReleaseStatus,
};
use teamgraph_common::types::LockToken;
use teamgraph_coord::lock::ReleaseOutcome;

use super::ApiState;
use crate::error::{ErrorCode, RelayError};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route(
            "/v1/entities/{entity_id}/lock",
            post(acquire_lock).get(get_lock).delete(release_lock),
        )
        .route("/v1/entities/{entity_id}/lock/renew", post(renew_lock))
}

async fn acquire_lock(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
    Json(payload): Json<AcquireLockRequest>,
) -> Result<Json<LockEnvelope>, RelayError> {
    let lock = state.collab.acquire_lock(&entity_id, &payload.holder_id).await?;
    Ok(Json(LockEnvelope { lock }))
}

async fn renew_lock(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
    Json(payload): Json<LockTokenRequest>,
) -> Result<Json<LockEnvelope>, RelayError> {
    ensure_token_matches_path(&entity_id, &payload.token)?;
    let lock = state.collab.renew_lock(&payload.token).await?;
    Ok(Json(LockEnvelope { lock }))
}

async fn release_lock(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
    Json(payload): Json<LockTokenRequest>,
) -> Result<Json<ReleaseLockResponse>, RelayError> {
    ensure_token_matches_path(&entity_id, &payload.token)?;
    let status = match state.collab.release_lock(&payload.token).await? {
        ReleaseOutcome::Released => ReleaseStatus::Released,
        ReleaseOutcome::AlreadyInactive => ReleaseStatus::AlreadyInactive,
    };
    Ok(Json(ReleaseLockResponse { status }))
}

async fn get_lock(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
) -> Json<LockHolderEnvelope> {
    Json(LockHolderEnvelope { lock: state.collab.lock_holder(&entity_id) })
}

fn ensure_token_matches_path(entity_id: &str, token: &LockToken) -> Result<(), RelayError> {
    if token.entity_id != entity_id {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!("lock token is for `{}`, not `{entity_id}`", token.entity_id),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use chrono::Duration;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::api::test_support::{body_json, get_request, json_request, test_app};

    async fn acquire(app: &axum::Router, entity_id: &str, holder_id: &str) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/v1/entities/{entity_id}/lock"),
                json!({ "holder_id": holder_id }),
            ))
            .await
            .expect("acquire should respond");
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["lock"].clone()
    }

    #[tokio::test]
    async fn acquire_returns_token_and_contention_is_423() {
        let app = test_app();
        let lock = acquire(&app.router, "E1", "ana").await;
        assert_eq!(lock["holder_id"], "ana");
        assert_eq!(lock["base_version"], 0);

        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::POST, "/v1/entities/E1/lock", json!({ "holder_id": "ben" })))
            .await
            .expect("acquire should respond");

        assert_eq!(response.status(), StatusCode::LOCKED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "ENTITY_LOCKED");
        assert_eq!(body["error"]["details"]["holder_id"], "ana");
        assert_eq!(body["error"]["details"]["expires_at"], lock["expires_at"]);
    }

    #[tokio::test]
    async fn holder_endpoint_shows_live_lock_only() {
        let app = test_app();
        acquire(&app.router, "E1", "ana").await;

        let response =
            app.router.clone().oneshot(get_request("/v1/entities/E1/lock")).await.expect("respond");
        assert_eq!(body_json(response).await["lock"]["holder_id"], "ana");

        app.clock.advance(Duration::minutes(16));
        let response =
            app.router.clone().oneshot(get_request("/v1/entities/E1/lock")).await.expect("respond");
        assert_eq!(body_json(response).await["lock"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn renew_after_expiry_is_410() {
        let app = test_app();
        let lock = acquire(&app.router, "E1", "ana").await;
        app.clock.advance(Duration::minutes(16));

        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::POST, "/v1/entities/E1/lock/renew", json!({ "token": lock })))
            .await
            .expect("renew should respond");

        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(body_json(response).await["error"]["code"], "LOCK_EXPIRED_OR_NOT_HELD");
    }

    #[tokio::test]
    async fn release_is_idempotent_and_stale_tokens_are_403() {
        let app = test_app();
        let ana = acquire(&app.router, "E1", "ana").await;

        for expected in ["released", "already_inactive"] {
            let response = app
                .router
                .clone()
                .oneshot(json_request(Method::DELETE, "/v1/entities/E1/lock", json!({ "token": ana })))
                .await
                .expect("release should respond");
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["status"], expected);
        }

        acquire(&app.router, "E1", "ben").await;
        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::DELETE, "/v1/entities/E1/lock", json!({ "token": ana })))
            .await
            .expect("release should respond");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"]["code"], "LOCK_NOT_HOLDER");
    }

    #[tokio::test]
    async fn token_for_another_entity_is_400() {
        let app = test_app();
        let lock = acquire(&app.router, "E1", "ana").await;

        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::POST, "/v1/entities/E2/lock/renew", json!({ "token": lock })))
            .await
            .expect("renew should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn store_outage_is_503() {
        let app = test_app();
        app.store.set_offline(true);

        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::POST, "/v1/entities/E1/lock", json!({ "holder_id": "ana" })))
            .await
            .expect("acquire should respond");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "STORE_UNAVAILABLE");
        assert_eq!(body["error"]["retryable"], true);
    }
}
