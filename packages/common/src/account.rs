#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether an account brings its own cloud storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Files uploaded by this user live in the user's own cloud storage.
    Owning,
    /// Files uploaded by this user live in the storage of an owning user.
    Sharing,
}

/// Sign-in scheme of an account.
///
/// The set is closed: every place that dispatches on a scheme matches
/// exhaustively, so adding a scheme is a compile error until it is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
pub enum AccountScheme {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Google"))]
    Google,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Dropbox"))]
    Dropbox,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Microsoft"))]
    Microsoft,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Facebook"))]
    Facebook,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "AppleSignIn"))]
    AppleSignIn,
}

impl AccountScheme {
    pub const ALL: &'static [AccountScheme] = &[
        Self::Google,
        Self::Dropbox,
        Self::Microsoft,
        Self::Facebook,
        Self::AppleSignIn,
    ];

    pub fn user_type(&self) -> UserType {
        match self {
            Self::Google | Self::Dropbox | Self::Microsoft => UserType::Owning,
            Self::Facebook | Self::AppleSignIn => UserType::Sharing,
        }
    }

    /// Owning schemes that keep files under a named folder in the user's drive.
    pub fn requires_cloud_folder(&self) -> bool {
        matches!(self, Self::Google)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Dropbox => "Dropbox",
            Self::Microsoft => "Microsoft",
            Self::Facebook => "Facebook",
            Self::AppleSignIn => "AppleSignIn",
        }
    }
}

impl fmt::Display for AccountScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|scheme| scheme.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown account scheme '{}'", s))
    }
}
