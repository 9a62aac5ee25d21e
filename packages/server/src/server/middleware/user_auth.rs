//! Caller identity extraction for the trigger endpoints.
//!
//! Authentication proper is owned by the user-facing app, which fronts this
//! service and forwards the verified caller id in `X-User-Id`. A trigger can
//! therefore only ever enqueue work for the caller's own identity.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing caller identity"))?;
        let user_id = header
            .parse::<Uuid>()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid caller identity"))?;
        Ok(AuthUser { user_id })
    }
}
