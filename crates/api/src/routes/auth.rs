//! Login endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::Session;
use serde::Deserialize;
use store::Store;

use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /auth/login
#[tracing::instrument(skip(state, req), fields(email = %req.email))]
pub async fn login<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.users.authenticate(&req.email, &req.password).await?;
    Ok(Json(session))
}
