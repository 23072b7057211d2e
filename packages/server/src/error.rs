use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::resolver::ResolverError;
use common::storage::CloudStorageError;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

use crate::account::AccountError;

/// Failure of an external collaborator: cloud storage or account lookup.
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("Cloud storage error: {0}")]
    Storage(#[from] CloudStorageError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),
}

impl ExternalError {
    /// The user has to sign in again before their storage can be used.
    pub fn is_reauthentication_required(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_access_revoked(),
            Self::Account(e) => e.is_reauthentication_required(),
        }
    }
}

/// Errors raised by the synchronization engine.
///
/// A master version mismatch is not an error; commits report it through
/// `CommitOutcome::MasterVersionUpdate`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A lock is held by someone else. Retry shortly.
    #[error("Resource busy: {0}")]
    Busy(String),

    /// Another device already changed the file this batch was based on.
    #[error("File version conflict: {0}")]
    FileVersionConflict(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl SyncError {
    pub fn is_reauthentication_required(&self) -> bool {
        matches!(self, Self::External(e) if e.is_reauthentication_required())
    }
}

impl From<CloudStorageError> for SyncError {
    fn from(err: CloudStorageError) -> Self {
        SyncError::External(ExternalError::Storage(err))
    }
}

impl From<AccountError> for SyncError {
    fn from(err: AccountError) -> Self {
        SyncError::External(ExternalError::Account(err))
    }
}

impl From<ResolverError> for SyncError {
    fn from(err: ResolverError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

/// Seconds a client should wait before retrying a busy commit.
const BUSY_RETRY_AFTER_SECS: u64 = 1;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `TOKEN_MISSING`,
    /// `TOKEN_INVALID`, `PERMISSION_DENIED`, `NOT_FOUND`, `CONFLICT`,
    /// `FILE_VERSION_CONFLICT`, `BUSY`, `CREDENTIALS_REVOKED`, `EXTERNAL_ERROR`,
    /// `INTERNAL_ERROR`.
    pub code: &'static str,
    /// Human-readable error description.
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    TokenMissing,
    TokenInvalid,
    PermissionDenied,
    NotFound(String),
    Conflict(String),
    FileVersionConflict(String),
    /// Lock held elsewhere. Contains seconds until retry is sensible.
    Busy {
        retry_after: u64,
    },
    CredentialsRevoked(String),
    External(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::TokenMissing => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_MISSING",
                    message: "Authentication required".into(),
                },
            ),
            AppError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_INVALID",
                    message: "Invalid or expired token".into(),
                },
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    code: "PERMISSION_DENIED",
                    message: "Insufficient permissions".into(),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::FileVersionConflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "FILE_VERSION_CONFLICT",
                    message: msg,
                },
            ),
            AppError::Busy { retry_after } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    code: "BUSY",
                    message: format!("Sharing group is busy. Try again in {} seconds", retry_after),
                },
            ),
            AppError::CredentialsRevoked(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "CREDENTIALS_REVOKED",
                    message: msg,
                },
            ),
            AppError::External(detail) => {
                tracing::warn!("External collaborator error: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        code: "EXTERNAL_ERROR",
                        message: detail,
                    },
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = if let AppError::Busy { retry_after } = &self {
            Some(*retry_after)
        } else {
            None
        };

        let (status, body) = self.status_and_body();

        if let Some(seconds) = retry_after {
            (status, [("Retry-After", seconds.to_string())], Json(body)).into_response()
        } else {
            (status, Json(body)).into_response()
        }
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let reauth = err.is_reauthentication_required();
        match err {
            SyncError::Validation(msg) => AppError::Validation(msg),
            SyncError::NotFound(msg) => AppError::NotFound(msg),
            SyncError::PermissionDenied(msg) => {
                tracing::debug!("Permission denied: {msg}");
                AppError::PermissionDenied
            }
            SyncError::Busy(_) => AppError::Busy {
                retry_after: BUSY_RETRY_AFTER_SECS,
            },
            SyncError::FileVersionConflict(msg) => AppError::FileVersionConflict(msg),
            SyncError::External(e) if reauth => AppError::CredentialsRevoked(e.to_string()),
            SyncError::External(e) => AppError::External(e.to_string()),
            SyncError::InvariantViolation(msg) => AppError::Internal(msg),
            SyncError::Database(e) => AppError::Internal(e.to_string()),
        }
    }
}
