use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

pub const DEVICE_HEADER: &str = "X-Device-UUID";

/// The client device, identified by the `X-Device-UUID` header.
pub struct Device(pub Uuid);

impl<S> FromRequestParts<S> for Device
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(DEVICE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Validation(format!("Missing {DEVICE_HEADER} header")))?;

        let uuid = Uuid::parse_str(value.trim())
            .map_err(|_| AppError::Validation(format!("Invalid {DEVICE_HEADER} header")))?;

        Ok(Device(uuid))
    }
}
