use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use common::AccountScheme;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::entity::user;

const TOKEN_LIFETIME_DAYS: i64 = 7;

/// Claims of a device session token.
///
/// `sub` is the account's identifier at its sign-in provider. A token stops
/// authenticating once the stored account no longer carries the same
/// provider identifier and scheme.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub uid: i32,
    pub scheme: AccountScheme,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn matches(&self, user: &user::Model) -> bool {
        self.uid == user.id && self.sub == user.creds_id && self.scheme == user.account_scheme
    }
}

pub fn sign(secret: &str, user: &user::Model) -> Result<String> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::days(TOKEN_LIFETIME_DAYS))
        .ok_or_else(|| anyhow!("Token expiry out of range"))?;

    let claims = Claims {
        sub: user.creds_id.clone(),
        uid: user.id,
        scheme: user.account_scheme,
        iat: now.timestamp(),
        exp: expiration.timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify(secret: &str, token: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}
