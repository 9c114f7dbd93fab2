//! Shared application state.

use std::sync::Arc;

use domain::{
    BroadcastHub, CartService, CatalogService, JobQueue, OrderService, ServiceSettings,
    UserDirectory,
};
use store::Store;

/// Services shared by every handler.
pub struct AppState<S: Store> {
    pub catalog: CatalogService<S>,
    pub cart: CartService<S>,
    pub orders: OrderService<S>,
    pub users: Arc<dyn UserDirectory>,
    /// Fan-out of category changes to WebSocket clients.
    pub hub: BroadcastHub,
}

impl<S: Store> AppState<S> {
    /// Wires the services over one store, job queue and broadcast hub.
    pub fn new(
        store: Arc<S>,
        jobs: Arc<dyn JobQueue>,
        users: Arc<dyn UserDirectory>,
        settings: &ServiceSettings,
    ) -> Self {
        let hub = BroadcastHub::default();
        let catalog = CatalogService::new(store.clone(), Arc::new(hub.clone()), settings);
        let orders = OrderService::new(store.clone(), jobs.clone())
            .with_listings(catalog.listings())
            .with_low_stock_threshold(settings.low_stock_threshold);
        Self {
            catalog,
            cart: CartService::new(store, jobs, settings.low_stock_threshold),
            orders,
            users,
            hub,
        }
    }
}
