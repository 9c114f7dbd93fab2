use chrono::{DateTime, Utc};
use common::{CategoryId, Money, UserId};

use crate::model::{Order, OrderStatus, Product};

/// Sort key for product listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductOrdering {
    PriceAsc,
    PriceDesc,
    NameAsc,
    NameDesc,
    CreatedAsc,
    /// Newest first.
    #[default]
    CreatedDesc,
}

impl ProductOrdering {
    /// Parses the `ordering` query parameter (`price`, `-price`, `name`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "price" => Some(Self::PriceAsc),
            "-price" => Some(Self::PriceDesc),
            "name" => Some(Self::NameAsc),
            "-name" => Some(Self::NameDesc),
            "created_at" => Some(Self::CreatedAsc),
            "-created_at" => Some(Self::CreatedDesc),
            _ => None,
        }
    }

    pub(crate) fn sql(&self) -> &'static str {
        match self {
            Self::PriceAsc => "price ASC, id ASC",
            Self::PriceDesc => "price DESC, id ASC",
            Self::NameAsc => "name ASC, id ASC",
            Self::NameDesc => "name DESC, id ASC",
            Self::CreatedAsc => "created_at ASC, id ASC",
            Self::CreatedDesc => "created_at DESC, id ASC",
        }
    }

    pub(crate) fn compare(&self, a: &Product, b: &Product) -> std::cmp::Ordering {
        let primary = match self {
            Self::PriceAsc => a.price.cmp(&b.price),
            Self::PriceDesc => b.price.cmp(&a.price),
            Self::NameAsc => a.name.cmp(&b.name),
            Self::NameDesc => b.name.cmp(&a.name),
            Self::CreatedAsc => a.created_at.cmp(&b.created_at),
            Self::CreatedDesc => b.created_at.cmp(&a.created_at),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Builder for product listings.
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    /// Products directly in this category.
    pub category: Option<CategoryId>,

    /// Products in this category or any of its children.
    pub parent: Option<CategoryId>,

    pub featured: Option<bool>,

    /// Only products whose discount price is below the list price.
    pub on_sale: bool,

    /// Case insensitive match on name or description.
    pub search: Option<String>,

    pub min_price: Option<Money>,
    pub max_price: Option<Money>,

    /// Hide inactive products.
    pub active_only: bool,

    pub ordering: ProductOrdering,

    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ProductQuery {
    /// Creates a query over active products, newest first.
    pub fn new() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    /// Creates a query that also returns inactive products.
    pub fn including_inactive() -> Self {
        Self::default()
    }

    pub fn category(mut self, id: CategoryId) -> Self {
        self.category = Some(id);
        self
    }

    pub fn parent(mut self, id: CategoryId) -> Self {
        self.parent = Some(id);
        self
    }

    pub fn featured(mut self, featured: bool) -> Self {
        self.featured = Some(featured);
        self
    }

    pub fn on_sale(mut self) -> Self {
        self.on_sale = true;
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn min_price(mut self, price: Money) -> Self {
        self.min_price = Some(price);
        self
    }

    pub fn max_price(mut self, price: Money) -> Self {
        self.max_price = Some(price);
        self
    }

    pub fn ordering(mut self, ordering: ProductOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Applies every filter except `parent`, ordering and paging.
    pub(crate) fn matches(&self, product: &Product) -> bool {
        if self.active_only && !product.is_active {
            return false;
        }
        if let Some(category) = self.category
            && product.category_id != Some(category)
        {
            return false;
        }
        if let Some(featured) = self.featured
            && product.is_featured != featured
        {
            return false;
        }
        if self.on_sale && !product.is_on_sale() {
            return false;
        }
        if let Some(ref term) = self.search {
            let term = term.to_lowercase();
            if !product.name.to_lowercase().contains(&term)
                && !product.description.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        if let Some(min) = self.min_price
            && product.price < min
        {
            return false;
        }
        if let Some(max) = self.max_price
            && product.price > max
        {
            return false;
        }
        true
    }
}

/// Builder for order listings. Results are always newest first.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Restrict to one owner. `None` lists every user's orders.
    pub user_id: Option<UserId>,

    pub status: Option<OrderStatus>,

    /// Substring of the order number.
    pub order_number: Option<String>,

    /// Orders created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,

    /// Orders created at or before this instant.
    pub created_before: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl OrderQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query scoped to one user.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn order_number(mut self, fragment: impl Into<String>) -> Self {
        self.order_number = Some(fragment.into());
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn matches(&self, order: &Order) -> bool {
        if let Some(user_id) = self.user_id
            && order.user_id != user_id
        {
            return false;
        }
        if let Some(status) = self.status
            && order.status != status
        {
            return false;
        }
        if let Some(ref fragment) = self.order_number
            && !order.order_number.contains(fragment.as_str())
        {
            return false;
        }
        if let Some(after) = self.created_after
            && order.created_at < after
        {
            return false;
        }
        if let Some(before) = self.created_before
            && order.created_at > before
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_query_defaults_to_active_newest_first() {
        let query = ProductQuery::new();
        assert!(query.active_only);
        assert_eq!(query.ordering, ProductOrdering::CreatedDesc);
        assert!(query.limit.is_none());

        assert!(!ProductQuery::including_inactive().active_only);
    }

    #[test]
    fn product_query_builder_chain() {
        let category = CategoryId::new();
        let query = ProductQuery::new()
            .category(category)
            .featured(true)
            .on_sale()
            .search("shirt")
            .min_price(Money::from_minor(100))
            .max_price(Money::from_minor(900))
            .ordering(ProductOrdering::PriceAsc)
            .limit(8)
            .offset(16);

        assert_eq!(query.category, Some(category));
        assert_eq!(query.featured, Some(true));
        assert!(query.on_sale);
        assert_eq!(query.search.as_deref(), Some("shirt"));
        assert_eq!(query.min_price, Some(Money::from_minor(100)));
        assert_eq!(query.max_price, Some(Money::from_minor(900)));
        assert_eq!(query.ordering, ProductOrdering::PriceAsc);
        assert_eq!(query.limit, Some(8));
        assert_eq!(query.offset, Some(16));
    }

    #[test]
    fn ordering_parses_sort_keys() {
        assert_eq!(ProductOrdering::parse("price"), Some(ProductOrdering::PriceAsc));
        assert_eq!(ProductOrdering::parse("-price"), Some(ProductOrdering::PriceDesc));
        assert_eq!(
            ProductOrdering::parse("-created_at"),
            Some(ProductOrdering::CreatedDesc)
        );
        assert_eq!(ProductOrdering::parse("stock"), None);
    }

    #[test]
    fn order_query_for_user() {
        let user = UserId::new();
        let query = OrderQuery::for_user(user)
            .status(OrderStatus::Paid)
            .order_number("2025");

        assert_eq!(query.user_id, Some(user));
        assert_eq!(query.status, Some(OrderStatus::Paid));
        assert_eq!(query.order_number.as_deref(), Some("2025"));
    }
}
