//! Business services of the shop.
//!
//! - [`CatalogService`]: category tree, products, slugs and read caches
//! - [`CartService`]: per-user cart lines with advisory stock checks
//! - [`OrderService`]: atomic checkout and the order state machine
//!
//! Collaborators sit behind traits: [`JobQueue`] for background work,
//! [`ChangeBroadcaster`] for change notifications and [`UserDirectory`] for
//! authentication. Each has an in-process implementation.

pub mod broadcast;
pub mod cart;
pub mod catalog;
pub mod error;
pub mod jobs;
pub mod order;
pub mod settings;
pub mod users;

pub use broadcast::{
    BroadcastHub, CATEGORY_TOPIC, CategoryChange, ChangeAction, ChangeBroadcaster, TopicMessage,
};
pub use cart::{CartService, CartSummary};
pub use catalog::{
    CatalogService, CategoryInput, CategoryNode, ProductInput, ProductListings,
};
pub use error::{DomainError, Result};
pub use jobs::{InMemoryJobQueue, dispatch, Job, JobDescriptor, JobQueue, QueueError};
pub use order::{CheckoutRequest, OrderAction, OrderService, next_status};
pub use settings::{DEFAULT_LOW_STOCK_THRESHOLD, ServiceSettings};
pub use users::{InMemoryUserDirectory, Session, User, UserDirectory};
