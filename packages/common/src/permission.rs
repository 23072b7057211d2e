#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access level of a user within a sharing group.
///
/// Levels are ordered: `Read < Write < Admin`. A member holding a level
/// implicitly holds every lower level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Download files and read the index.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "read"))]
    Read,
    /// Upload, change and delete files.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "write"))]
    Write,
    /// Everything above, plus inviting others and managing the group.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "admin"))]
    Admin,
}

impl Permission {
    pub const ALL: &'static [Permission] = &[Self::Read, Self::Write, Self::Admin];

    /// Returns true if this level grants at least `required`.
    pub fn has_minimum(&self, required: Permission) -> bool {
        *self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid permission string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePermissionError {
    invalid: String,
}

impl fmt::Display for ParsePermissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid permission '{}'. Valid values: read, write, admin",
            self.invalid
        )
    }
}

impl std::error::Error for ParsePermissionError {}

impl FromStr for Permission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            _ => Err(ParsePermissionError {
                invalid: s.to_string(),
            }),
        }
    }
}
