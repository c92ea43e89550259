use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use teamgraph_coord::error::{CoordError, LockError, MergeError, StoreError};
use tracing::{error, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    NotFound,
    EntityLocked,
    LockExpiredOrNotHeld,
    LockNotHolder,
    LockNotRenewable,
    VersionConflict,
    InvalidStrategy,
    StoreUnavailable,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::EntityLocked => "ENTITY_LOCKED",
            Self::LockExpiredOrNotHeld => "LOCK_EXPIRED_OR_NOT_HELD",
            Self::LockNotHolder => "LOCK_NOT_HOLDER",
            Self::LockNotRenewable => "LOCK_NOT_RENEWABLE",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::InvalidStrategy => "INVALID_STRATEGY",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::EntityLocked => StatusCode::LOCKED,
            Self::LockExpiredOrNotHeld => StatusCode::GONE,
            Self::LockNotHolder => StatusCode::FORBIDDEN,
            Self::LockNotRenewable => StatusCode::UNPROCESSABLE_ENTITY,
            Self::VersionConflict => StatusCode::CONFLICT,
            Self::InvalidStrategy => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the same request may succeed later without changes.
    pub const fn retryable(self) -> bool {
        matches!(self, Self::EntityLocked | Self::StoreUnavailable | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::NotFound => "requested resource not found",
            Self::EntityLocked => "entity is being edited by another member",
            Self::LockExpiredOrNotHeld => "lock expired or is no longer held",
            Self::LockNotHolder => "caller does not hold this lock",
            Self::LockNotRenewable => "lock cannot be renewed",
            Self::VersionConflict => "entity changed since the expected version",
            Self::InvalidStrategy => "resolution strategy is not valid for this request",
            Self::StoreUnavailable => "graph store is unavailable",
            Self::InternalError => "internal server error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
    details: Value,
    request_id: Option<String>,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}), request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

impl From<StoreError> for RelayError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(reason) => {
                warn!(reason = %reason, "graph store unavailable");
                Self::from_code(ErrorCode::StoreUnavailable)
            }
            StoreError::Corrupt(reason) => {
                error!(reason = %reason, "graph store returned malformed data");
                Self::from_code(ErrorCode::InternalError)
            }
            StoreError::TeamMismatch { ref entity_id, ref owner_team_id, ref team_id } => {
                let details = json!({
                    "entity_id": entity_id,
                    "owner_team_id": owner_team_id,
                    "team_id": team_id,
                });
                Self::new(ErrorCode::ValidationFailed, value.to_string()).with_details(details)
            }
        }
    }
}

impl From<LockError> for RelayError {
    fn from(value: LockError) -> Self {
        let message = value.to_string();
        match value {
            LockError::AlreadyLocked { entity_id, holder_id, expires_at } => {
                Self::new(ErrorCode::EntityLocked, message).with_details(json!({
                    "entity_id": entity_id,
                    "holder_id": holder_id,
                    "expires_at": expires_at,
                }))
            }
            LockError::LockExpiredOrNotHeld { entity_id } => {
                Self::new(ErrorCode::LockExpiredOrNotHeld, message)
                    .with_details(json!({ "entity_id": entity_id }))
            }
            LockError::NotHolder { entity_id } => Self::new(ErrorCode::LockNotHolder, message)
                .with_details(json!({ "entity_id": entity_id })),
            LockError::NotRenewable { entity_id } => {
                Self::new(ErrorCode::LockNotRenewable, message)
                    .with_details(json!({ "entity_id": entity_id }))
            }
            LockError::Store(store) => store.into(),
        }
    }
}

impl From<MergeError> for RelayError {
    fn from(value: MergeError) -> Self {
        match value {
            MergeError::InvalidStrategy(message) => Self::new(ErrorCode::InvalidStrategy, message),
            MergeError::Store(store) => store.into(),
        }
    }
}

impl From<CoordError> for RelayError {
    fn from(value: CoordError) -> Self {
        match value {
            CoordError::Lock(lock) => lock.into(),
            CoordError::Merge(merge) => merge.into(),
            CoordError::Store(store) => store.into(),
            CoordError::ConflictNotFound(conflict_id) => {
                Self::new(ErrorCode::NotFound, format!("no pending conflict `{conflict_id}`"))
            }
            CoordError::Validation(message) => Self::new(ErrorCode::ValidationFailed, message),
        }
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}
