use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

use crate::{session::AuthError, store::PersistenceError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

/// Request-shape problems the caller can fix.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("user already exists")]
    UserAlreadyExists,

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("{0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(&'static str),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        use RequestError::*;
        match self {
            UserAlreadyExists => StatusCode::CONFLICT,
            PasswordMismatch | Invalid(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<AuthError>() {
            e.status()
        } else if let Some(e) = self.0.downcast_ref::<RequestError>() {
            e.status()
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status.is_server_error() {
            tracing::error!(error = ?self.0, "request failed");
            "internal error".to_owned()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(AuthError);
apperr_impl!(RequestError);
apperr_impl!(PersistenceError);
apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(tower_sessions::session::Error);
apperr_impl!(axum::Error);
apperr_impl!(anyhow::Error);
