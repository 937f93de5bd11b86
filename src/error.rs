use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failure talking to a public data source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned {status}")]
    Status { status: u16 },
    #[error("malformed upstream body: {0}")]
    Malformed(String),
}

impl FetchError {
    /// 403/404 from a static pricing bucket means the object was never published.
    pub fn is_not_published(&self) -> bool {
        matches!(self, FetchError::Status { status: 403 | 404 })
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to fetch {what}: {reason}")]
    UpstreamUnavailable { what: &'static str, reason: String },
    #[error("Invalid data format: {0}")]
    MalformedData(String),
    #[error("Pricing data not available. Please ensure the data has been downloaded.")]
    PricingDataMissing,
    #[error("{0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::InvalidRequest(rejection.body_text())
    }
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::MalformedData(_)
            | ServiceError::PricingDataMissing
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
