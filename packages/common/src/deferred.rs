#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a deferred upload.
///
/// `PendingChange -> Completed` on success, `PendingChange -> Error` on
/// failure. An `Error` row goes back to `PendingChange` when retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "camelCase")]
pub enum DeferredUploadStatus {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pendingChange"))]
    PendingChange,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "error"))]
    Error,
}

impl DeferredUploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingChange => "pendingChange",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DeferredUploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeferredUploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendingChange" => Ok(Self::PendingChange),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "Invalid deferred upload status '{}'. Must be 'pendingChange', 'completed' or 'error'",
                s
            )),
        }
    }
}

/// Error codes recorded on a deferred upload when processing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeferredErrorCode {
    /// Cloud credentials of the owning user were revoked or expired.
    AccessRevoked,
    /// The change resolver rejected the stored content or a change record.
    MergeFailed,
    /// Cloud storage failed for any other reason.
    CloudFailure,
    /// The file names a change resolver that is not registered.
    MissingResolver,
    /// A staged change points at a file that is no longer in the index.
    MissingIndex,
}

impl DeferredErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessRevoked => "ACCESS_REVOKED",
            Self::MergeFailed => "MERGE_FAILED",
            Self::CloudFailure => "CLOUD_FAILURE",
            Self::MissingResolver => "MISSING_RESOLVER",
            Self::MissingIndex => "MISSING_INDEX",
        }
    }

    /// Whether the periodic sweep should try again.
    ///
    /// Revoked credentials need the user to sign in again and a missing
    /// resolver needs a deployment, so neither is retried automatically.
    pub fn is_retryable(&self) -> bool {
        Self::RETRYABLE.contains(self)
    }

    pub const RETRYABLE: &'static [DeferredErrorCode] =
        &[Self::CloudFailure, Self::MergeFailed, Self::MissingIndex];
}

impl fmt::Display for DeferredErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeferredErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCESS_REVOKED" => Ok(Self::AccessRevoked),
            "MERGE_FAILED" => Ok(Self::MergeFailed),
            "CLOUD_FAILURE" => Ok(Self::CloudFailure),
            "MISSING_RESOLVER" => Ok(Self::MissingResolver),
            "MISSING_INDEX" => Ok(Self::MissingIndex),
            _ => Err(format!("Invalid deferred error code '{}'", s)),
        }
    }
}
