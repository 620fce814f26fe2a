//! Error taxonomy of the HTTP surface.
//!
//! Handlers speak `ApiError`; the `IntoResponse` impl owns the mapping to
//! status codes, so the taxonomy lives in exactly one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),

    #[error("unauthorized")]
    Unauthorized,

    /// Registration with an email that is already taken.
    #[error("login is already taken")]
    LoginTaken,

    /// Order number already uploaded by a different user.
    #[error("order was uploaded by another user")]
    ForeignOrder,

    /// Syntactically numeric order number with a bad checksum.
    #[error("order number failed verification")]
    InvalidNumber,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::LoginTaken | ApiError::ForeignOrder => StatusCode::CONFLICT,
            ApiError::InvalidNumber => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Insufficient => ApiError::InsufficientBalance,
            StoreError::Unavailable => {
                tracing::warn!("request hit the store while it is not configured");
                ApiError::Internal
            }
            StoreError::Database(e) => {
                tracing::error!("database error: {e}");
                ApiError::Internal
            }
        }
    }
}
