//! Catalog service: category tree, products, slugs and read caches.

mod cache;
mod service;
pub mod slug;

pub use cache::{ProductListings, TtlCache};
pub use service::{
    CatalogService, CategoryInput, CategoryNode, FEATURED_LIMIT, ON_SALE_LIMIT, ProductInput,
};
