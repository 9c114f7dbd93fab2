//! Bearer token extractors.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use domain::{DomainError, User};
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

/// The caller behind an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl<S: Store + 'static> FromRequestParts<Arc<AppState<S>>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                DomainError::Unauthorized("Missing Authorization header".to_string())
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            DomainError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <token>".to_string(),
            )
        })?;

        let user = state.users.current_user(token.trim()).await?;
        Ok(AuthUser(user))
    }
}

/// An authenticated caller with the staff flag.
#[derive(Debug, Clone)]
pub struct StaffUser(pub User);

impl<S: Store + 'static> FromRequestParts<Arc<AppState<S>>> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff {
            return Err(DomainError::Forbidden("staff access required".to_string()).into());
        }
        Ok(StaffUser(user))
    }
}
