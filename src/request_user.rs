use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the acting attorney, taken from the `X-User-Id` header set by
/// the gateway in front of this service. Absent for unattributed requests.
#[derive(Debug, Clone, Copy)]
pub struct RequestUser(pub Option<Uuid>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(RequestUser(None));
        };
        let raw = raw
            .to_str()
            .map_err(|_| AppError::bad_request("invalid X-User-Id header"))?;
        let user_id = Uuid::parse_str(raw)
            .map_err(|_| AppError::bad_request("X-User-Id must be a UUID"))?;
        Ok(RequestUser(Some(user_id)))
    }
}
