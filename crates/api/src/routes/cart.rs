//! Cart endpoints. Every route acts on the caller's own cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CartItemId, Money, ProductId};
use domain::CartSummary;
use serde::{Deserialize, Serialize};
use store::Store;
use store::model::{CartItem, CartLine, Product};

use super::parse_id;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::state::AppState;

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

/// A cart line with its product and live subtotal.
#[derive(Debug, Serialize)]
pub struct CartLineResponse {
    pub id: CartItemId,
    pub product: Product,
    pub quantity: u32,
    pub subtotal: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CartLine> for CartLineResponse {
    fn from(line: CartLine) -> Self {
        let subtotal = line.subtotal();
        Self {
            id: line.item.id,
            quantity: line.item.quantity,
            created_at: line.item.created_at,
            updated_at: line.item.updated_at,
            product: line.product,
            subtotal,
        }
    }
}

/// GET /cart
pub async fn list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<CartLineResponse>>, ApiError> {
    let lines = state.cart.list(user.id).await?;
    Ok(Json(lines.into_iter().map(CartLineResponse::from).collect()))
}

/// POST /cart: adds units, merging with an existing line for the product.
pub async fn add<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<AddToCartRequest>,
) -> Result<(StatusCode, Json<CartItem>), ApiError> {
    let item = state
        .cart
        .add_or_increment(user.id, req.product_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// PATCH /cart/{id}
pub async fn update<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateQuantityRequest>,
) -> Result<Json<CartItem>, ApiError> {
    let id: CartItemId = parse_id(&id, "id")?;
    let item = state.cart.update_quantity(user.id, id, req.quantity).await?;
    Ok(Json(item))
}

/// DELETE /cart/{id}
pub async fn remove<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: CartItemId = parse_id(&id, "id")?;
    state.cart.remove(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /cart/summary
pub async fn summary<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
) -> Result<Json<CartSummary>, ApiError> {
    Ok(Json(state.cart.summary(user.id).await?))
}

/// DELETE /cart
pub async fn clear<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, ApiError> {
    state.cart.clear(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
