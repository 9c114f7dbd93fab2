//! Staff-only catalog and fulfilment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CategoryId, Money, OrderId, OrderItemId, ProductId};
use domain::{CategoryInput, ProductInput};
use serde::{Deserialize, Deserializer, Serialize};
use store::Store;
use store::model::{Category, Order, OrderItem, Product, ProductUpdate};

use super::orders::OrderFilter;
use super::{optional_body, parse_id};
use crate::auth::StaffUser;
use crate::error::ApiError;
use crate::extract::{JsonBody, QueryParams};
use crate::state::AppState;

/// Distinguishes an absent field from an explicit `null`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial product update. `null` clears `discount_price` or `category_id`.
#[derive(Debug, Default, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    #[serde(default, deserialize_with = "nullable")]
    pub discount_price: Option<Option<Money>>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub category_id: Option<Option<CategoryId>>,
}

impl From<ProductPatch> for ProductUpdate {
    fn from(patch: ProductPatch) -> Self {
        ProductUpdate {
            name: patch.name,
            description: patch.description,
            price: patch.price,
            discount_price: patch.discount_price,
            is_active: patch.is_active,
            is_featured: patch.is_featured,
            category_id: patch.category_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShipRequest {
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemRemovalResponse {
    pub item: OrderItem,
    pub stock_restored: bool,
}

// Categories

/// POST /admin/categories
pub async fn create_category<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    JsonBody(input): JsonBody<CategoryInput>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let category = state.catalog.create_category(input).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// PUT /admin/categories/{id}
pub async fn update_category<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
    JsonBody(input): JsonBody<CategoryInput>,
) -> Result<Json<Category>, ApiError> {
    let id: CategoryId = parse_id(&id, "id")?;
    Ok(Json(state.catalog.update_category(id, input).await?))
}

/// DELETE /admin/categories/{id}
pub async fn delete_category<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: CategoryId = parse_id(&id, "id")?;
    state.catalog.delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Products

/// POST /admin/products
pub async fn create_product<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    JsonBody(input): JsonBody<ProductInput>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = state.catalog.create_product(input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// PATCH /admin/products/{id}
pub async fn update_product<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<ProductPatch>,
) -> Result<Json<Product>, ApiError> {
    let id: ProductId = parse_id(&id, "id")?;
    Ok(Json(state.catalog.update_product(id, patch.into()).await?))
}

/// POST /admin/products/{id}/restock
pub async fn restock<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<RestockRequest>,
) -> Result<Json<Product>, ApiError> {
    let id: ProductId = parse_id(&id, "id")?;
    Ok(Json(state.catalog.restock(id, req.quantity).await?))
}

// Orders

/// GET /admin/orders: every user's orders.
pub async fn search_orders<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    QueryParams(filter): QueryParams<OrderFilter>,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.search_orders(filter.into_query()?).await?))
}

/// POST /admin/orders/{id}/ship
pub async fn ship<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(staff): StaffUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id(&id, "id")?;
    let req: ShipRequest = optional_body(&body)?;
    let order = state
        .orders
        .mark_shipping(id, req.tracking_number, req.carrier)
        .await?;
    tracing::info!(order_id = %id, staff_id = %staff.id, "order shipped");
    Ok(Json(order))
}

/// POST /admin/orders/{id}/deliver
pub async fn deliver<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id(&id, "id")?;
    Ok(Json(state.orders.mark_delivered(id).await?))
}

/// DELETE /admin/orders/{id}: only cancelled orders.
pub async fn delete_order<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: OrderId = parse_id(&id, "id")?;
    state.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/order-items/{id}
pub async fn delete_order_item<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
) -> Result<Json<OrderItemRemovalResponse>, ApiError> {
    let id: OrderItemId = parse_id(&id, "id")?;
    let removal = state.orders.delete_order_item(id).await?;
    Ok(Json(OrderItemRemovalResponse {
        item: removal.item,
        stock_restored: removal.stock_restored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_tells_null_from_absent() {
        let patch: ProductPatch =
            serde_json::from_str(r#"{"discount_price": null, "name": "Lamp"}"#).unwrap();
        let update = ProductUpdate::from(patch);
        assert_eq!(update.discount_price, Some(None));
        assert_eq!(update.category_id, None);
        assert_eq!(update.name.as_deref(), Some("Lamp"));

        let patch: ProductPatch = serde_json::from_str(r#"{"discount_price": 900}"#).unwrap();
        assert_eq!(patch.discount_price, Some(Some(Money::from_minor(900))));
    }
}
