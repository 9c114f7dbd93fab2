pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{OrderQuery, ProductOrdering, ProductQuery};
pub use store::{CartStore, CatalogStore, CategoryScope, OrderStore, Store};
