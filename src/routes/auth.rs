//! Caller identification.
//!
//! Authentication proper happens upstream; by the time a request reaches
//! this service the gateway has stamped the verified caller id into the
//! `x-user-id` header. Requests without it are rejected.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Header carrying the verified caller id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extractor yielding the authenticated caller's id.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing x-user-id header".to_string()))?;
        let raw = header
            .to_str()
            .map_err(|_| AppError::Unauthorized("malformed x-user-id header".to_string()))?;
        let user_id = Uuid::parse_str(raw)
            .map_err(|_| AppError::Unauthorized("malformed x-user-id header".to_string()))?;
        Ok(Self(user_id))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    #[tokio::test]
    async fn valid_header_yields_caller_id() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(USER_ID_HEADER, id.to_string())
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let user = AuthenticatedUser::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(user.0, id);
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_rejected() {
        let request = Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        assert!(
            AuthenticatedUser::from_request_parts(&mut parts, &())
                .await
                .is_err()
        );

        let request = Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        assert!(
            AuthenticatedUser::from_request_parts(&mut parts, &())
                .await
                .is_err()
        );
    }
}
