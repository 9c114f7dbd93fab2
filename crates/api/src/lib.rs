//! HTTP and WebSocket surface of the ShopEase backend.
//!
//! Exposes the catalog, cart, checkout and order endpoints, the staff-only
//! `/admin` routes, a live category feed, health and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{admin, auth, cart, catalog, orders, system, ws};

    let metrics_router = Router::new()
        .route("/metrics", get(system::metrics))
        .with_state(metrics_handle);

    let admin_router = Router::new()
        .route("/categories", post(admin::create_category::<S>))
        .route(
            "/categories/{id}",
            put(admin::update_category::<S>).delete(admin::delete_category::<S>),
        )
        .route("/products", post(admin::create_product::<S>))
        .route("/products/{id}", patch(admin::update_product::<S>))
        .route("/products/{id}/restock", post(admin::restock::<S>))
        .route("/orders", get(admin::search_orders::<S>))
        .route("/orders/{id}", delete(admin::delete_order::<S>))
        .route("/orders/{id}/ship", post(admin::ship::<S>))
        .route("/orders/{id}/deliver", post(admin::deliver::<S>))
        .route("/order-items/{id}", delete(admin::delete_order_item::<S>));

    Router::new()
        .route("/health", get(system::health::<S>))
        .route("/auth/login", post(auth::login::<S>))
        // Catalog
        .route("/categories", get(catalog::list_categories::<S>))
        .route("/categories/tree", get(catalog::category_tree::<S>))
        .route("/categories/{id}", get(catalog::get_category::<S>))
        .route("/categories/{id}/children", get(catalog::children::<S>))
        .route("/products", get(catalog::list_products::<S>))
        .route("/products/featured", get(catalog::featured::<S>))
        .route("/products/on_sale", get(catalog::on_sale::<S>))
        .route("/products/{id}", get(catalog::get_product::<S>))
        // Cart
        .route(
            "/cart",
            get(cart::list::<S>)
                .post(cart::add::<S>)
                .delete(cart::clear::<S>),
        )
        .route("/cart/summary", get(cart::summary::<S>))
        .route(
            "/cart/{id}",
            patch(cart::update::<S>).delete(cart::remove::<S>),
        )
        // Orders
        .route("/orders", get(orders::list::<S>))
        .route("/orders/checkout", post(orders::checkout::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/cancel", post(orders::cancel::<S>))
        .route(
            "/orders/{id}/payment_complete",
            post(orders::payment_complete::<S>),
        )
        .route("/ws/categories", get(ws::categories::<S>))
        .nest("/admin", admin_router)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
