//! Public catalog reads.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{CategoryId, Money, ProductId};
use domain::CategoryNode;
use serde::Deserialize;
use store::model::{Category, Product};
use store::{ProductOrdering, ProductQuery, Store};

use super::parse_id;
use crate::error::ApiError;
use crate::extract::QueryParams;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CategoryFilter {
    pub parent: Option<CategoryId>,
}

/// Query string of `GET /products`.
#[derive(Debug, Default, Deserialize)]
pub struct ProductFilter {
    pub category: Option<CategoryId>,
    pub parent: Option<CategoryId>,
    pub featured: Option<bool>,
    #[serde(default)]
    pub on_sale: bool,
    pub search: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub ordering: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ProductFilter {
    /// Only a parent category is given, which the per-category cache serves.
    fn is_plain_parent_listing(&self) -> bool {
        self.parent.is_some()
            && self.category.is_none()
            && self.featured.is_none()
            && !self.on_sale
            && self.search.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
            && self.ordering.is_none()
            && self.limit.is_none()
            && self.offset.is_none()
    }

    pub(crate) fn into_query(self) -> Result<ProductQuery, ApiError> {
        let mut query = ProductQuery::new();
        if let Some(id) = self.category {
            query = query.category(id);
        }
        if let Some(id) = self.parent {
            query = query.parent(id);
        }
        if let Some(featured) = self.featured {
            query = query.featured(featured);
        }
        if self.on_sale {
            query = query.on_sale();
        }
        if let Some(term) = self.search.filter(|t| !t.trim().is_empty()) {
            query = query.search(term.trim());
        }
        if let Some(min) = self.min_price {
            query = query.min_price(Money::from_minor(min));
        }
        if let Some(max) = self.max_price {
            query = query.max_price(Money::from_minor(max));
        }
        if let Some(raw) = self.ordering.as_deref() {
            let ordering = ProductOrdering::parse(raw).ok_or_else(|| {
                ApiError::bad_request("ordering", format!("unknown ordering '{raw}'"))
            })?;
            query = query.ordering(ordering);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        Ok(query)
    }
}

/// GET /categories: active roots, or the active children of `?parent=`.
pub async fn list_categories<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    QueryParams(filter): QueryParams<CategoryFilter>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.catalog.list_categories(filter.parent).await?))
}

/// GET /categories/tree
pub async fn category_tree<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<CategoryNode>>, ApiError> {
    Ok(Json(state.catalog.category_tree().await?))
}

/// GET /categories/{id}
pub async fn get_category<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Category>, ApiError> {
    let id: CategoryId = parse_id(&id, "id")?;
    Ok(Json(state.catalog.get_category(id).await?))
}

/// GET /categories/{id}/children
pub async fn children<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let id: CategoryId = parse_id(&id, "id")?;
    Ok(Json(state.catalog.children(id).await?))
}

/// GET /products
pub async fn list_products<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    QueryParams(filter): QueryParams<ProductFilter>,
) -> Result<Json<Vec<Product>>, ApiError> {
    if filter.is_plain_parent_listing()
        && let Some(parent) = filter.parent
    {
        return Ok(Json(state.catalog.category_products(parent).await?));
    }
    let products = state.catalog.list_products(filter.into_query()?).await?;
    Ok(Json(products))
}

/// GET /products/featured
pub async fn featured<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.catalog.featured_products().await?))
}

/// GET /products/on_sale
pub async fn on_sale<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.catalog.on_sale_products().await?))
}

/// GET /products/{id}
pub async fn get_product<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let id: ProductId = parse_id(&id, "id")?;
    Ok(Json(state.catalog.get_product(id).await?))
}
