#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a staged upload row.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "camelCase")]
pub enum UploadState {
    /// First version of a file; the complete content is already in cloud storage.
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "v0UploadCompleteFile"))]
    V0UploadCompleteFile,
    /// Change record for an existing file, merged later by a change resolver.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "vNUploadFileChange"))]
    VNUploadFileChange,
    /// Deletion of a single file.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "deleteSingleFile"))]
    DeleteSingleFile,
    /// Committed and awaiting deferred processing.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "uploaded"))]
    Uploaded,
}

impl UploadState {
    /// Returns true for states that carry file content (as opposed to deletions).
    pub fn is_upload_file(&self) -> bool {
        matches!(self, Self::V0UploadCompleteFile | Self::VNUploadFileChange)
    }

    /// States a client may declare when staging.
    pub const STAGEABLE: &'static [UploadState] = &[
        Self::V0UploadCompleteFile,
        Self::VNUploadFileChange,
        Self::DeleteSingleFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0UploadCompleteFile => "v0UploadCompleteFile",
            Self::VNUploadFileChange => "vNUploadFileChange",
            Self::DeleteSingleFile => "deleteSingleFile",
            Self::Uploaded => "uploaded",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v0UploadCompleteFile" => Ok(Self::V0UploadCompleteFile),
            "vNUploadFileChange" => Ok(Self::VNUploadFileChange),
            "deleteSingleFile" => Ok(Self::DeleteSingleFile),
            "uploaded" => Ok(Self::Uploaded),
            _ => Err(format!("Invalid upload state '{}'", s)),
        }
    }
}
