use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::booking::BookingStatus;
use crate::models::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("the selected time is no longer available")]
    SlotTaken,

    #[error("booking already processed (status: {})", .status.as_str())]
    AlreadyProcessed { status: BookingStatus },

    #[error("cannot move booking from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("not allowed to perform this action")]
    Permission,

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::SlotTaken => StatusCode::CONFLICT,
            BookingError::AlreadyProcessed { .. } => StatusCode::CONFLICT,
            BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
            BookingError::Permission => StatusCode::FORBIDDEN,
            BookingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            BookingError::Database(e) => {
                tracing::error!("database error: {}", e);
                "DB error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
