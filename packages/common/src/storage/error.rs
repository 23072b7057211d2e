use std::fmt;

/// Errors reported by a `CloudStorage` backend.
///
/// Revoked credentials are kept apart from every other failure so that
/// callers can ask the user to sign in again instead of retrying.
#[derive(Debug)]
pub enum CloudStorageError {
    /// The named file does not exist.
    NotFound(String),
    /// The owning account's access token was revoked or has expired.
    AccessTokenRevokedOrExpired(String),
    /// A failure that may succeed when tried again later.
    Transient(String),
    /// An I/O error occurred.
    Io(std::io::Error),
    /// The file name cannot be used by this backend.
    InvalidName(String),
    /// The file exceeds the configured size limit.
    SizeLimitExceeded { actual: u64, limit: u64 },
}

impl CloudStorageError {
    pub fn is_access_revoked(&self) -> bool {
        matches!(self, Self::AccessTokenRevokedOrExpired(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl fmt::Display for CloudStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "cloud file not found: {name}"),
            Self::AccessTokenRevokedOrExpired(msg) => {
                write!(f, "cloud access token revoked or expired: {msg}")
            }
            Self::Transient(msg) => write!(f, "transient cloud storage failure: {msg}"),
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::InvalidName(name) => write!(f, "invalid cloud file name: {name}"),
            Self::SizeLimitExceeded { actual, limit } => {
                write!(f, "file exceeds size limit ({actual} > {limit} bytes)")
            }
        }
    }
}

impl std::error::Error for CloudStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CloudStorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
