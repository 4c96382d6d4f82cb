use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;

use crate::lifecycle::Rejection;
use crate::models::ApiResponse;

static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(true);

/// Production deployments hide the debug detail of unexpected failures.
pub fn expose_error_details(expose: bool) {
    EXPOSE_DETAILS.store(expose, Ordering::Relaxed);
}

#[derive(Debug, Serialize)]
struct DuplicateRes {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnexpectedRes {
    success: bool,
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Duplicate entry detected.")]
    Duplicate { detail: Option<String> },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(DieselError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }
}

impl From<DieselError> for ServiceError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info) => {
                ServiceError::Duplicate {
                    detail: info.constraint_name().map(str::to_owned),
                }
            }
            DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, ref info) => {
                ServiceError::Validation(info.message().to_owned())
            }
            other => ServiceError::Database(other),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::Rejected(_) | ServiceError::Duplicate { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Database(_) | ServiceError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            ServiceError::Duplicate { detail } => HttpResponse::build(status).json(DuplicateRes {
                message: self.to_string(),
                error: detail.clone(),
            }),
            ServiceError::Database(_) | ServiceError::Pool(_) => {
                log::error!("Unexpected failure: {:?}", self);
                let stack = EXPOSE_DETAILS
                    .load(Ordering::Relaxed)
                    .then(|| format!("{:?}", self));
                HttpResponse::build(status).json(UnexpectedRes {
                    success: false,
                    status: status.as_u16(),
                    message: self.to_string(),
                    stack,
                })
            }
            _ => HttpResponse::build(status).json(ApiResponse { message: self.to_string() }),
        }
    }
}
