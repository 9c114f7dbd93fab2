//! Checkout and order endpoints for buyers.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::CheckoutRequest;
use serde::Deserialize;
use store::model::{Order, OrderStatus};
use store::{OrderQuery, Store};

use super::{optional_body, parse_id};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::{JsonBody, QueryParams};
use crate::state::AppState;

/// Order list filters shared by the buyer and staff listings.
#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<String>,
    pub order_number: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl OrderFilter {
    pub(crate) fn into_query(self) -> Result<OrderQuery, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<OrderStatus>)
            .transpose()
            .map_err(|e| ApiError::bad_request("status", e.to_string()))?;
        Ok(OrderQuery {
            user_id: None,
            status,
            order_number: self.order_number.filter(|n| !n.is_empty()),
            created_after: self.created_after,
            created_before: self.created_before,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentCompleteRequest {
    #[serde(default)]
    pub payment_id: Option<String>,
}

/// GET /orders
pub async fn list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    QueryParams(filter): QueryParams<OrderFilter>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state.orders.list_orders(user.id, filter.into_query()?).await?;
    Ok(Json(orders))
}

/// POST /orders/checkout: turns the selected cart lines into one order.
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn checkout<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.orders.checkout(user.id, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id(&id, "id")?;
    Ok(Json(state.orders.get_order(user.id, id).await?))
}

/// POST /orders/{id}/cancel
pub async fn cancel<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id(&id, "id")?;
    Ok(Json(state.orders.cancel(user.id, id).await?))
}

/// POST /orders/{id}/payment_complete: the body is optional.
pub async fn payment_complete<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id(&id, "id")?;
    let req: PaymentCompleteRequest = optional_body(&body)?;
    let order = state.orders.mark_paid(user.id, id, req.payment_id).await?;
    Ok(Json(order))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_parses_status() {
        let filter = OrderFilter {
            status: Some("paid".to_string()),
            order_number: Some(String::new()),
            ..OrderFilter::default()
        };
        let query = filter.into_query().unwrap();
        assert_eq!(query.status, Some(OrderStatus::Paid));
        assert!(query.order_number.is_none());
    }

    #[test]
    fn filter_rejects_unknown_status() {
        let filter = OrderFilter {
            status: Some("lost".to_string()),
            ..OrderFilter::default()
        };
        assert!(matches!(
            filter.into_query(),
            Err(ApiError::BadRequest {
                field: Some("status"),
                ..
            })
        ));
    }
}
