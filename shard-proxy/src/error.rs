use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shard_ring::Error as RouterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Router(e) => match e {
                RouterError::InvalidKey | RouterError::InvalidShardName(_) => {
                    StatusCode::BAD_REQUEST
                }
                RouterError::KeyNotFound { .. } => StatusCode::NOT_FOUND,
                RouterError::Backend { .. } => StatusCode::SERVICE_UNAVAILABLE,
                RouterError::ShardUnavailable(_)
                | RouterError::EmptyRing
                | RouterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(format!("Invalid JSON: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Router(RouterError::KeyNotFound { .. }) => "Key not found".to_string(),
            ApiError::Router(e @ RouterError::Backend { .. }) => {
                tracing::warn!("Shard backend error: {}", e);
                e.to_string()
            }
            ApiError::Router(
                e @ (RouterError::ShardUnavailable(_)
                | RouterError::EmptyRing
                | RouterError::Config(_)),
            ) => {
                tracing::error!("Router error: {}", e);
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
