use std::sync::Arc;

use common::{CategoryId, Money, ProductId};
use serde::{Deserialize, Serialize};
use store::{
    CatalogStore, CategoryScope, ProductQuery, StoreError,
    model::{Category, CategoryDraft, NewProduct, Product, ProductUpdate, STOCK_MAX},
};

use super::cache::{ProductListings, TtlCache};
use super::slug;
use crate::broadcast::{self, CategoryChange, ChangeAction, ChangeBroadcaster};
use crate::error::{DomainError, Result};
use crate::settings::ServiceSettings;

/// Size of the featured and on-sale shelves.
pub const FEATURED_LIMIT: usize = 8;
pub const ON_SALE_LIMIT: usize = 8;

const CATEGORY_NAME_MAX: usize = 100;
const PRODUCT_NAME_MAX: usize = 200;
const SLUG_ATTEMPTS: usize = 5;

fn default_active() -> bool {
    true
}

/// Administrative input for creating or replacing a category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryInput {
    pub name: String,
    /// Derived from the name when absent.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub order: i32,
}

impl CategoryInput {
    /// An active root category named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: None,
            description: String::new(),
            parent_id: None,
            is_active: true,
            order: 0,
        }
    }

    pub fn under(mut self, parent_id: CategoryId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name", "This field may not be blank"));
        }
        if name.chars().count() > CATEGORY_NAME_MAX {
            return Err(DomainError::validation(
                "name",
                format!("Ensure this field has no more than {CATEGORY_NAME_MAX} characters"),
            ));
        }
        if let Some(slug) = &self.slug
            && slug.chars().count() > CATEGORY_NAME_MAX
        {
            return Err(DomainError::validation(
                "slug",
                format!("Ensure this field has no more than {CATEGORY_NAME_MAX} characters"),
            ));
        }
        Ok(())
    }

    fn into_draft(self, slug: String) -> CategoryDraft {
        CategoryDraft {
            name: self.name.trim().to_string(),
            slug,
            description: self.description,
            parent_id: self.parent_id,
            is_active: self.is_active,
            order: self.order,
        }
    }
}

/// Administrative input for a new product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductInput {
    pub name: String,
    /// Generated from the name when absent.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    #[serde(default)]
    pub discount_price: Option<Money>,
    #[serde(default)]
    pub stock: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

impl ProductInput {
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            name: name.into(),
            slug: None,
            description: String::new(),
            price,
            discount_price: None,
            stock,
            is_active: true,
            is_featured: false,
            category_id: None,
        }
    }

    pub fn discount(mut self, price: Money) -> Self {
        self.discount_price = Some(price);
        self
    }

    pub fn in_category(mut self, id: CategoryId) -> Self {
        self.category_id = Some(id);
        self
    }

    pub fn featured(mut self) -> Self {
        self.is_featured = true;
        self
    }

    fn validate(&self) -> Result<()> {
        check_product_name(&self.name)?;
        check_amount("price", self.price)?;
        if self.stock > STOCK_MAX {
            return Err(DomainError::validation(
                "stock",
                format!("Ensure this value is less than or equal to {STOCK_MAX}"),
            ));
        }
        if let Some(discount) = self.discount_price {
            check_amount("discount_price", discount)?;
        }
        Ok(())
    }
}

fn check_product_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name", "This field may not be blank"));
    }
    if name.chars().count() > PRODUCT_NAME_MAX {
        return Err(DomainError::validation(
            "name",
            format!("Ensure this field has no more than {PRODUCT_NAME_MAX} characters"),
        ));
    }
    Ok(())
}

fn check_amount(field: &str, amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(DomainError::validation(
            field,
            "Ensure this value is greater than or equal to 0",
        ));
    }
    Ok(())
}

/// A root category with its active children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<Category>,
}

/// Catalog reads and administrative writes.
///
/// Category writes invalidate the cached lists, the tree, the category entry
/// and the product listings of the category and its parent, then announce the
/// change on the broadcaster.
pub struct CatalogService<S: CatalogStore + ?Sized> {
    store: Arc<S>,
    broadcaster: Arc<dyn ChangeBroadcaster>,
    category_lists: TtlCache<Option<CategoryId>, Vec<Category>>,
    category_tree: TtlCache<(), Vec<CategoryNode>>,
    category_entries: TtlCache<CategoryId, Category>,
    category_products: ProductListings,
}

impl<S: CatalogStore + ?Sized> CatalogService<S> {
    pub fn new(
        store: Arc<S>,
        broadcaster: Arc<dyn ChangeBroadcaster>,
        settings: &ServiceSettings,
    ) -> Self {
        Self {
            store,
            broadcaster,
            category_lists: TtlCache::new(settings.category_cache_ttl),
            category_tree: TtlCache::new(settings.category_cache_ttl),
            category_entries: TtlCache::new(settings.category_cache_ttl),
            category_products: ProductListings::new(settings.product_cache_ttl),
        }
    }

    /// The per-category product listings, for services that move stock.
    pub fn listings(&self) -> ProductListings {
        self.category_products.clone()
    }

    // Categories

    /// Active roots, or the active children of `parent`.
    #[tracing::instrument(skip(self))]
    pub async fn list_categories(&self, parent: Option<CategoryId>) -> Result<Vec<Category>> {
        if let Some(cached) = self.category_lists.get(&parent).await {
            return Ok(cached);
        }
        let scope = match parent {
            Some(id) => CategoryScope::ChildrenOf(id),
            None => CategoryScope::Roots,
        };
        let categories = self.store.list_categories(scope, true).await?;
        self.category_lists.insert(parent, categories.clone()).await;
        Ok(categories)
    }

    /// Active roots, each with its active children.
    #[tracing::instrument(skip(self))]
    pub async fn category_tree(&self) -> Result<Vec<CategoryNode>> {
        if let Some(cached) = self.category_tree.get(&()).await {
            return Ok(cached);
        }
        let roots = self.store.list_categories(CategoryScope::Roots, true).await?;
        let all = self.store.list_categories(CategoryScope::All, true).await?;
        let tree: Vec<CategoryNode> = roots
            .into_iter()
            .map(|root| CategoryNode {
                children: all
                    .iter()
                    .filter(|c| c.parent_id == Some(root.id))
                    .cloned()
                    .collect(),
                category: root,
            })
            .collect();
        self.category_tree.insert((), tree.clone()).await;
        Ok(tree)
    }

    /// An active category.
    #[tracing::instrument(skip(self))]
    pub async fn get_category(&self, id: CategoryId) -> Result<Category> {
        let category = match self.category_entries.get(&id).await {
            Some(category) => category,
            None => {
                let category = self
                    .store
                    .get_category(id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("category", id))?;
                self.category_entries.insert(id, category.clone()).await;
                category
            }
        };
        if !category.is_active {
            return Err(DomainError::not_found("category", id));
        }
        Ok(category)
    }

    /// Active children of an active category.
    #[tracing::instrument(skip(self))]
    pub async fn children(&self, id: CategoryId) -> Result<Vec<Category>> {
        self.get_category(id).await?;
        self.list_categories(Some(id)).await
    }

    #[tracing::instrument(skip(self), fields(name = %input.name))]
    pub async fn create_category(&self, input: CategoryInput) -> Result<Category> {
        input.validate()?;
        let slug = category_slug(&input);
        let category = self.store.insert_category(input.into_draft(slug)).await?;

        tracing::info!(category_id = %category.id, "category created");
        self.category_changed(ChangeAction::Create, &category, None)
            .await;
        Ok(category)
    }

    /// Replaces every editable field. An absent slug keeps the current one.
    #[tracing::instrument(skip(self), fields(name = %input.name))]
    pub async fn update_category(&self, id: CategoryId, input: CategoryInput) -> Result<Category> {
        input.validate()?;
        let current = self
            .store
            .get_category(id)
            .await?
            .ok_or_else(|| DomainError::not_found("category", id))?;
        let slug = match &input.slug {
            Some(_) => category_slug(&input),
            None => current.slug.clone(),
        };
        let category = self
            .store
            .update_category(id, input.into_draft(slug))
            .await?;

        tracing::info!(category_id = %id, "category updated");
        self.category_changed(ChangeAction::Update, &category, current.parent_id)
            .await;
        Ok(category)
    }

    /// Deletes a category. Children move to the root; products lose it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_category(&self, id: CategoryId) -> Result<Category> {
        let category = self.store.delete_category(id).await?;

        tracing::info!(category_id = %id, "category deleted");
        // Re-parented children are stale too.
        self.category_entries.clear().await;
        self.category_changed(ChangeAction::Delete, &category, None)
            .await;
        Ok(category)
    }

    async fn category_changed(
        &self,
        action: ChangeAction,
        category: &Category,
        previous_parent: Option<CategoryId>,
    ) {
        self.category_lists.clear().await;
        self.category_tree.clear().await;
        self.category_entries.invalidate(&category.id).await;
        self.category_products.invalidate(category.id).await;
        for parent in [category.parent_id, previous_parent].into_iter().flatten() {
            self.category_products.invalidate(parent).await;
        }

        let label = match action {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        };
        metrics::counter!("category_changes_total", "action" => label).increment(1);
        broadcast::announce(
            self.broadcaster.as_ref(),
            &CategoryChange::new(action, category),
        );
    }

    // Products

    #[tracing::instrument(skip(self))]
    pub async fn list_products(&self, query: ProductQuery) -> Result<Vec<Product>> {
        Ok(self.store.query_products(query).await?)
    }

    /// Active products of a category and its children, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn category_products(&self, id: CategoryId) -> Result<Vec<Product>> {
        if let Some(cached) = self.category_products.get(id).await {
            return Ok(cached);
        }
        let products = self
            .store
            .query_products(ProductQuery::new().parent(id))
            .await?;
        self.category_products.insert(id, products.clone()).await;
        Ok(products)
    }

    #[tracing::instrument(skip(self))]
    pub async fn featured_products(&self) -> Result<Vec<Product>> {
        self.list_products(ProductQuery::new().featured(true).limit(FEATURED_LIMIT))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn on_sale_products(&self) -> Result<Vec<Product>> {
        self.list_products(ProductQuery::new().on_sale().limit(ON_SALE_LIMIT))
            .await
    }

    /// An active product.
    #[tracing::instrument(skip(self))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product> {
        self.store
            .get_product(id)
            .await?
            .filter(|product| product.is_active)
            .ok_or_else(|| DomainError::not_found("product", id))
    }

    /// Returns a free slug for a product called `name`.
    ///
    /// The plain slug of the name is used when free; otherwise a random
    /// suffix is appended until a free one is found.
    #[tracing::instrument(skip(self))]
    pub async fn slug_for_product(&self, name: &str) -> Result<String> {
        let base = match slug::slugify(name) {
            base if base.is_empty() => "product".to_string(),
            base => base,
        };
        let mut candidate = base.clone();
        for _ in 0..SLUG_ATTEMPTS {
            if !self.store.product_slug_exists(&candidate).await? {
                return Ok(candidate);
            }
            candidate = slug::with_random_suffix(&base);
        }
        Err(DomainError::Conflict(format!(
            "no free slug found for '{base}'"
        )))
    }

    #[tracing::instrument(skip(self), fields(name = %input.name))]
    pub async fn create_product(&self, input: ProductInput) -> Result<Product> {
        input.validate()?;

        let mut attempts = 0;
        let product = loop {
            let slug = match &input.slug {
                Some(slug) => slug.clone(),
                None => self.slug_for_product(&input.name).await?,
            };
            let new = NewProduct {
                name: input.name.trim().to_string(),
                slug,
                description: input.description.clone(),
                price: input.price,
                discount_price: input.discount_price,
                stock: input.stock,
                is_active: input.is_active,
                is_featured: input.is_featured,
                category_id: input.category_id,
            };
            attempts += 1;
            match self.store.insert_product(new).await {
                Ok(product) => break product,
                // Another writer took the generated slug in between.
                Err(StoreError::Conflict(_)) if input.slug.is_none() && attempts < SLUG_ATTEMPTS => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        };

        tracing::info!(product_id = %product.id, slug = %product.slug, "product created");
        self.product_changed([product.category_id]).await;
        Ok(product)
    }

    /// Updates the non-stock fields of a product.
    #[tracing::instrument(skip(self))]
    pub async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        if let Some(name) = &update.name {
            check_product_name(name)?;
        }
        if let Some(price) = update.price {
            check_amount("price", price)?;
        }
        if let Some(Some(discount)) = update.discount_price {
            check_amount("discount_price", discount)?;
        }

        let previous = self
            .store
            .get_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", id))?;
        let product = self.store.update_product(id, update).await?;

        tracing::info!(product_id = %id, "product updated");
        self.product_changed([previous.category_id, product.category_id])
            .await;
        Ok(product)
    }

    /// Adds units to a product's stock atomically.
    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        if quantity == 0 {
            return Err(DomainError::validation(
                "quantity",
                "Ensure this value is greater than or equal to 1",
            ));
        }
        let product = self.store.increment_stock(id, quantity).await?;

        tracing::info!(product_id = %id, quantity, stock = product.stock, "product restocked");
        self.product_changed([product.category_id]).await;
        Ok(product)
    }

    async fn product_changed(&self, categories: impl IntoIterator<Item = Option<CategoryId>>) {
        for id in categories.into_iter().flatten() {
            self.category_products.invalidate(id).await;
            match self.store.get_category(id).await {
                Ok(Some(category)) => {
                    if let Some(parent) = category.parent_id {
                        self.category_products.invalidate(parent).await;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(category_id = %id, error = %e, "dropping all product listings");
                    self.category_products.clear().await;
                }
            }
        }
    }
}

fn category_slug(input: &CategoryInput) -> String {
    let source = input.slug.as_deref().unwrap_or(&input.name);
    match slug::slugify(source) {
        slug if slug.is_empty() => "category".to_string(),
        slug => slug,
    }
}
