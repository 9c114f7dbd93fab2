use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartItemId, CategoryId, Money, OrderId, OrderItemId, ProductId, UserId};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderQuery, ProductQuery, Result, StoreError,
    model::{
        CartItem, CartLine, Category, CategoryDraft, NewOrder, NewProduct, Order, OrderItem,
        OrderItemRemoval, OrderStatus, Product, ProductUpdate, RestoreOutcome, ShippingDetails,
        StatusChange, add_stock, check_placement, effective_price,
    },
    store::{CartStore, CatalogStore, CategoryScope, OrderStore},
};

const CATEGORY_COLUMNS: &str =
    "id, name, slug, description, parent_id, is_active, sort_order, created_at, updated_at";

const PRODUCT_COLUMNS: &str = "id, name, slug, description, price, discount_price, stock, \
     is_active, is_featured, category_id, created_at, updated_at";

const CART_COLUMNS: &str = "id, user_id, product_id, quantity, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, total_price, payment_method, \
     recipient_name, recipient_phone, shipping_address1, shipping_address2, shipping_zip_code, \
     shipping_note, payment_id, paid_at, created_at, updated_at";

const ORDER_ITEM_COLUMNS: &str =
    "id, order_id, product_id, product_name, price, quantity, restored_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_category(row: &PgRow) -> Result<Category> {
        Ok(Category {
            id: CategoryId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            parent_id: row
                .try_get::<Option<Uuid>, _>("parent_id")?
                .map(CategoryId::from_uuid),
            is_active: row.try_get("is_active")?,
            order: row.try_get("sort_order")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_product(row: &PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            price: Money::from_minor(row.try_get("price")?),
            discount_price: row
                .try_get::<Option<i64>, _>("discount_price")?
                .map(Money::from_minor),
            stock: to_u32(row.try_get("stock")?, "stock")?,
            is_active: row.try_get("is_active")?,
            is_featured: row.try_get("is_featured")?,
            category_id: row
                .try_get::<Option<Uuid>, _>("category_id")?
                .map(CategoryId::from_uuid),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_cart_item(row: &PgRow) -> Result<CartItem> {
        Ok(CartItem {
            id: CartItemId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            quantity: to_u32(row.try_get("quantity")?, "quantity")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order_item(row: &PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            id: OrderItemId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            product_name: row.try_get("product_name")?,
            price: Money::from_minor(row.try_get("price")?),
            quantity: to_u32(row.try_get("quantity")?, "quantity")?,
            restored_at: row.try_get("restored_at")?,
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let payment_method: String = row.try_get("payment_method")?;
        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            order_number: row.try_get("order_number")?,
            status: status.parse()?,
            total_price: Money::from_minor(row.try_get("total_price")?),
            payment_method: payment_method.parse()?,
            shipping: ShippingDetails {
                recipient_name: row.try_get("recipient_name")?,
                recipient_phone: row.try_get("recipient_phone")?,
                shipping_address1: row.try_get("shipping_address1")?,
                shipping_address2: row.try_get("shipping_address2")?,
                shipping_zip_code: row.try_get("shipping_zip_code")?,
                shipping_note: row.try_get("shipping_note")?,
            },
            payment_id: row.try_get("payment_id")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            items,
        })
    }

    /// Loads the items of several orders, keyed by order.
    async fn load_items(
        conn: &mut PgConnection,
        order_ids: &[Uuid],
    ) -> Result<HashMap<OrderId, Vec<OrderItem>>> {
        let sql = format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items \
             WHERE order_id = ANY($1) ORDER BY order_id, position"
        );
        let rows = sqlx::query(&sql)
            .bind(order_ids)
            .fetch_all(&mut *conn)
            .await?;

        let mut items: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let item = Self::row_to_order_item(row)?;
            items.entry(item.order_id).or_default().push(item);
        }
        Ok(items)
    }

    async fn fetch_order(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let Some(row) = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let mut items = Self::load_items(conn, &[id.as_uuid()]).await?;
        let items = items.remove(&id).unwrap_or_default();
        Self::row_to_order(&row, items).map(Some)
    }

    /// Adds `quantity` to a product's stock with the product row locked.
    async fn credit_stock(conn: &mut PgConnection, id: ProductId, quantity: u32) -> Result<u32> {
        let stock: i32 = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::not_found("product", id))?;
        let new_stock = add_stock(id, to_u32(stock, "stock")?, quantity)?;

        sqlx::query("UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(to_i32(new_stock)?)
            .execute(&mut *conn)
            .await?;
        Ok(new_stock)
    }

    /// Marks every unrestored item of an order restored and credits its
    /// quantity back. Callers run this inside their transaction.
    async fn restore_order_items(conn: &mut PgConnection, order_id: OrderId) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE order_items SET restored_at = NOW() \
             WHERE order_id = $1 AND restored_at IS NULL RETURNING product_id, quantity",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        let mut credits = Vec::with_capacity(rows.len());
        for row in &rows {
            let product_id = ProductId::from_uuid(row.try_get("product_id")?);
            credits.push((product_id, to_u32(row.try_get("quantity")?, "quantity")?));
        }
        // Same lock order as checkout.
        credits.sort_by_key(|(product_id, _)| *product_id);
        for (product_id, quantity) in credits {
            Self::credit_stock(conn, product_id, quantity).await?;
        }
        Ok(())
    }

    /// Checks tree placement with the parent row locked.
    async fn check_category(
        conn: &mut PgConnection,
        id: Option<CategoryId>,
        draft: &CategoryDraft,
    ) -> Result<()> {
        let parent = match draft.parent_id {
            Some(parent_id) => {
                let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1 FOR UPDATE");
                let row = sqlx::query(&sql)
                    .bind(parent_id.as_uuid())
                    .fetch_optional(&mut *conn)
                    .await?
                    .ok_or_else(|| StoreError::not_found("category", parent_id))?;
                Some(Self::row_to_category(&row)?)
            }
            None => None,
        };

        let has_children = match id {
            Some(id) => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM categories WHERE parent_id = $1)",
                )
                .bind(id.as_uuid())
                .fetch_one(&mut *conn)
                .await?
            }
            None => false,
        };

        check_placement(id, parent.as_ref(), has_children)
    }
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("negative {column}: {value}")))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Conflict(format!("quantity {value} is too large")))
}

/// Maps a violated constraint to the error callers can act on.
fn map_constraint(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        match db_err.constraint() {
            Some("categories_sibling_name_key" | "categories_root_name_key") => {
                return StoreError::InvalidHierarchy(
                    "a sibling category with the same name already exists".to_string(),
                );
            }
            Some("categories_not_self_parent") => {
                return StoreError::InvalidHierarchy(
                    "a category cannot be its own parent".to_string(),
                );
            }
            Some("categories_slug_key") => {
                return StoreError::Conflict("category slug is taken".to_string());
            }
            Some("products_slug_key") => {
                return StoreError::Conflict("product slug is taken".to_string());
            }
            Some("orders_order_number_key") => {
                return StoreError::Conflict("order number is taken".to_string());
            }
            Some("products_category_id_fkey") => {
                return StoreError::NotFound {
                    entity: "category",
                    id: "referenced category".to_string(),
                };
            }
            Some("cart_items_product_id_fkey") => {
                return StoreError::NotFound {
                    entity: "product",
                    id: "referenced product".to_string(),
                };
            }
            _ => {}
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn insert_category(&self, draft: CategoryDraft) -> Result<Category> {
        let mut tx = self.pool.begin().await?;
        Self::check_category(&mut tx, None, &draft).await?;

        let sql = format!(
            "INSERT INTO categories (id, name, slug, description, parent_id, is_active, sort_order) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {CATEGORY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&draft.name)
            .bind(&draft.slug)
            .bind(&draft.description)
            .bind(draft.parent_id.map(|id| id.as_uuid()))
            .bind(draft.is_active)
            .bind(draft.order)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_constraint)?;

        tx.commit().await?;
        Self::row_to_category(&row)
    }

    async fn update_category(&self, id: CategoryId, draft: CategoryDraft) -> Result<Category> {
        let mut tx = self.pool.begin().await?;

        // Lock the row first so a concurrent child insert waits for the move.
        sqlx::query("SELECT id FROM categories WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("category", id))?;
        Self::check_category(&mut tx, Some(id), &draft).await?;

        let sql = format!(
            "UPDATE categories SET name = $2, slug = $3, description = $4, parent_id = $5, \
             is_active = $6, sort_order = $7, updated_at = NOW() \
             WHERE id = $1 RETURNING {CATEGORY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(&draft.name)
            .bind(&draft.slug)
            .bind(&draft.description)
            .bind(draft.parent_id.map(|id| id.as_uuid()))
            .bind(draft.is_active)
            .bind(draft.order)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_constraint)?;

        tx.commit().await?;
        Self::row_to_category(&row)
    }

    async fn delete_category(&self, id: CategoryId) -> Result<Category> {
        // Children and products are detached by ON DELETE SET NULL.
        let sql = format!("DELETE FROM categories WHERE id = $1 RETURNING {CATEGORY_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_constraint)?
            .ok_or_else(|| StoreError::not_found("category", id))?;
        Self::row_to_category(&row)
    }

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_category).transpose()
    }

    async fn list_categories(
        &self,
        scope: CategoryScope,
        active_only: bool,
    ) -> Result<Vec<Category>> {
        let mut sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE 1=1");
        match scope {
            CategoryScope::All => {}
            CategoryScope::Roots => sql.push_str(" AND parent_id IS NULL"),
            CategoryScope::ChildrenOf(_) => sql.push_str(" AND parent_id = $1"),
        }
        if active_only {
            sql.push_str(" AND is_active");
        }
        sql.push_str(" ORDER BY sort_order ASC, name ASC");

        let mut query = sqlx::query(&sql);
        if let CategoryScope::ChildrenOf(parent) = scope {
            query = query.bind(parent.as_uuid());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_category).collect()
    }

    async fn category_slug_exists(&self, slug: &str) -> Result<bool> {
        let exists = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let sql = format!(
            "INSERT INTO products (id, name, slug, description, price, discount_price, stock, \
             is_active, is_featured, category_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&product.name)
            .bind(&product.slug)
            .bind(&product.description)
            .bind(product.price.minor())
            .bind(product.discount_price.map(|p| p.minor()))
            .bind(to_i32(product.stock)?)
            .bind(product.is_active)
            .bind(product.is_featured)
            .bind(product.category_id.map(|id| id.as_uuid()))
            .fetch_one(&self.pool)
            .await
            .map_err(map_constraint)?;
        Self::row_to_product(&row)
    }

    async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("product", id))?;
        let mut product = Self::row_to_product(&row)?;
        update.apply_to(&mut product);

        // Stock is left out on purpose: it only moves through the
        // conditional decrement and the restore paths.
        let sql = format!(
            "UPDATE products SET name = $2, description = $3, price = $4, discount_price = $5, \
             is_active = $6, is_featured = $7, category_id = $8, updated_at = NOW() \
             WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price.minor())
            .bind(product.discount_price.map(|p| p.minor()))
            .bind(product.is_active)
            .bind(product.is_featured)
            .bind(product.category_id.map(|id| id.as_uuid()))
            .fetch_one(&mut *tx)
            .await
            .map_err(map_constraint)?;

        tx.commit().await?;
        Self::row_to_product(&row)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn product_slug_exists(&self, slug: &str) -> Result<bool> {
        let exists = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn query_products(&self, query: ProductQuery) -> Result<Vec<Product>> {
        let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE 1=1");
        let mut param_count = 0;

        if query.active_only {
            sql.push_str(" AND is_active");
        }
        if query.on_sale {
            sql.push_str(" AND discount_price IS NOT NULL AND discount_price < price");
        }
        if query.category.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND category_id = ${param_count}"));
        }
        if query.parent.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND category_id IN (SELECT id FROM categories WHERE id = ${param_count} OR parent_id = ${param_count})"
            ));
        }
        if query.featured.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND is_featured = ${param_count}"));
        }
        if query.search.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND (name ILIKE ${param_count} OR description ILIKE ${param_count})"
            ));
        }
        if query.min_price.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND price >= ${param_count}"));
        }
        if query.max_price.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND price <= ${param_count}"));
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(query.ordering.sql());

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(category) = query.category {
            sqlx_query = sqlx_query.bind(category.as_uuid());
        }
        if let Some(parent) = query.parent {
            sqlx_query = sqlx_query.bind(parent.as_uuid());
        }
        if let Some(featured) = query.featured {
            sqlx_query = sqlx_query.bind(featured);
        }
        if let Some(ref term) = query.search {
            sqlx_query = sqlx_query.bind(format!("%{}%", escape_like(term)));
        }
        if let Some(min) = query.min_price {
            sqlx_query = sqlx_query.bind(min.minor());
        }
        if let Some(max) = query.max_price {
            sqlx_query = sqlx_query.bind(max.minor());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_product).collect()
    }

    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        Self::credit_stock(&mut tx, id, quantity).await?;

        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Self::row_to_product(&row)
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn list_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let sql = format!(
            "SELECT c.id AS cart_id, c.user_id AS cart_user_id, c.quantity AS cart_quantity, \
             c.created_at AS cart_created_at, c.updated_at AS cart_updated_at, {} \
             FROM cart_items c JOIN products p ON p.id = c.product_id \
             WHERE c.user_id = $1 ORDER BY c.created_at ASC, c.id ASC",
            PRODUCT_COLUMNS
                .split(", ")
                .map(|column| format!("p.{column}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let product = Self::row_to_product(row)?;
                let item = CartItem {
                    id: CartItemId::from_uuid(row.try_get("cart_id")?),
                    user_id: UserId::from_uuid(row.try_get("cart_user_id")?),
                    product_id: product.id,
                    quantity: to_u32(row.try_get("cart_quantity")?, "quantity")?,
                    created_at: row.try_get("cart_created_at")?,
                    updated_at: row.try_get("cart_updated_at")?,
                };
                Ok(CartLine { item, product })
            })
            .collect()
    }

    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>> {
        let sql = format!("SELECT {CART_COLUMNS} FROM cart_items WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_cart_item).transpose()
    }

    async fn find_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>> {
        let sql =
            format!("SELECT {CART_COLUMNS} FROM cart_items WHERE user_id = $1 AND product_id = $2");
        let row = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_cart_item).transpose()
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let sql = format!(
            "INSERT INTO cart_items (id, user_id, product_id, quantity) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, product_id) DO UPDATE \
             SET quantity = cart_items.quantity + EXCLUDED.quantity, updated_at = NOW() \
             RETURNING {CART_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .bind(to_i32(quantity)?)
            .fetch_one(&self.pool)
            .await
            .map_err(map_constraint)?;
        Self::row_to_cart_item(&row)
    }

    async fn set_cart_quantity(&self, id: CartItemId, quantity: u32) -> Result<CartItem> {
        let sql = format!(
            "UPDATE cart_items SET quantity = $2, updated_at = NOW() WHERE id = $1 RETURNING {CART_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(to_i32(quantity)?)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("cart item", id))?;
        Self::row_to_cart_item(&row)
    }

    async fn delete_cart_item(&self, id: CartItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_cart_items_updated_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_items WHERE updated_at < $1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn checkout(&self, new: NewOrder, cart_item_ids: &[CartItemId]) -> Result<Order> {
        let mut requested: Vec<Uuid> = cart_item_ids.iter().map(|id| id.as_uuid()).collect();
        requested.sort();
        requested.dedup();

        let mut tx = self.pool.begin().await?;

        // Lock the selected lines so a parallel checkout of the same cart waits.
        let rows = sqlx::query(
            "SELECT id, product_id, quantity FROM cart_items \
             WHERE id = ANY($1) AND user_id = $2 ORDER BY product_id FOR UPDATE",
        )
        .bind(&requested)
        .bind(new.user_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let product_id: Uuid = row.try_get("product_id")?;
            let quantity: i32 = row.try_get("quantity")?;
            lines.push((id, ProductId::from_uuid(product_id), quantity));
        }
        if lines.len() != requested.len() {
            let missing = requested
                .iter()
                .filter(|id| !lines.iter().any(|(line_id, _, _)| line_id == *id))
                .map(|id| CartItemId::from_uuid(*id))
                .collect();
            return Err(StoreError::InvalidCartSelection { missing });
        }

        let order_id = OrderId::new();
        let mut items = Vec::with_capacity(lines.len());
        for (_, product_id, quantity) in &lines {
            // The conditional decrement is the authoritative stock check.
            let decremented = sqlx::query(
                "UPDATE products SET stock = stock - $2, updated_at = NOW() \
                 WHERE id = $1 AND stock >= $2 RETURNING name, price, discount_price",
            )
            .bind(product_id.as_uuid())
            .bind(*quantity)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = decremented else {
                let current = sqlx::query("SELECT name, stock FROM products WHERE id = $1")
                    .bind(product_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| StoreError::not_found("product", product_id))?;
                return Err(StoreError::InsufficientStock {
                    product_id: *product_id,
                    product_name: current.try_get("name")?,
                    requested: to_u32(*quantity, "quantity")?,
                    available: to_u32(current.try_get("stock")?, "stock")?,
                });
            };

            let price = Money::from_minor(row.try_get("price")?);
            let discount = row
                .try_get::<Option<i64>, _>("discount_price")?
                .map(Money::from_minor);
            items.push(OrderItem {
                id: OrderItemId::new(),
                order_id,
                product_id: *product_id,
                product_name: row.try_get("name")?,
                price: effective_price(price, discount),
                quantity: to_u32(*quantity, "quantity")?,
                restored_at: None,
            });
        }

        let total_price: Money = items.iter().map(OrderItem::subtotal).sum();
        let sql = format!(
            "INSERT INTO orders (id, user_id, order_number, status, total_price, payment_method, \
             recipient_name, recipient_phone, shipping_address1, shipping_address2, \
             shipping_zip_code, shipping_note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {ORDER_COLUMNS}"
        );
        let order_row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(new.user_id.as_uuid())
            .bind(&new.order_number)
            .bind(OrderStatus::Pending.as_str())
            .bind(total_price.minor())
            .bind(new.payment_method.as_str())
            .bind(&new.shipping.recipient_name)
            .bind(&new.shipping.recipient_phone)
            .bind(&new.shipping.shipping_address1)
            .bind(&new.shipping.shipping_address2)
            .bind(&new.shipping.shipping_zip_code)
            .bind(&new.shipping.shipping_note)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_constraint)?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, product_name, price, quantity, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(item.id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(&item.product_name)
            .bind(item.price.minor())
            .bind(to_i32(item.quantity)?)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM cart_items WHERE id = ANY($1)")
            .bind(&requested)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Self::row_to_order(&order_row, items)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_order(&mut conn, id).await
    }

    async fn list_orders(&self, query: OrderQuery) -> Result<Vec<Order>> {
        let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE 1=1");
        let mut param_count = 0;

        if query.user_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND user_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.order_number.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND order_number LIKE ${param_count}"));
        }
        if query.created_after.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.created_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(user_id) = query.user_id {
            sqlx_query = sqlx_query.bind(user_id.as_uuid());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(ref fragment) = query.order_number {
            sqlx_query = sqlx_query.bind(format!("%{}%", escape_like(fragment)));
        }
        if let Some(after) = query.created_after {
            sqlx_query = sqlx_query.bind(after);
        }
        if let Some(before) = query.created_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx_query.fetch_all(&mut *conn).await?;
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<_, _>>()?;
        let mut items = Self::load_items(&mut conn, &ids).await?;

        rows.iter()
            .map(|row| {
                let id = OrderId::from_uuid(row.try_get("id")?);
                Self::row_to_order(row, items.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<Order> {
        let (payment_id, paid_at): (Option<String>, Option<DateTime<Utc>>) = match &change {
            StatusChange::Paid {
                payment_id,
                paid_at,
            } => (Some(payment_id.clone()), Some(*paid_at)),
            _ => (None, None),
        };

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE orders SET status = $3, payment_id = COALESCE($4, payment_id), \
             paid_at = COALESCE($5, paid_at), updated_at = NOW() \
             WHERE id = $1 AND status = $2",
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(change.target().as_str())
        .bind(payment_id)
        .bind(paid_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            return match actual {
                Some(actual) => Err(StoreError::StatusConflict {
                    order_id: id,
                    expected,
                    actual: actual.parse()?,
                }),
                None => Err(StoreError::not_found("order", id)),
            };
        }
        if change == StatusChange::Cancelled {
            Self::restore_order_items(&mut tx, id).await?;
        }

        let order = Self::fetch_order(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("order", id))?;
        tx.commit().await?;
        Ok(order)
    }

    async fn delete_order(&self, id: OrderId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let status: String =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::not_found("order", id))?;
        let actual: OrderStatus = status.parse()?;
        if actual != OrderStatus::Cancelled {
            return Err(StoreError::StatusConflict {
                order_id: id,
                expected: OrderStatus::Cancelled,
                actual,
            });
        }

        // Item rows go with the order, so credit anything still outstanding first.
        Self::restore_order_items(&mut tx, id).await?;
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_order_item(&self, id: OrderItemId) -> Result<Option<OrderItem>> {
        let sql = format!("SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_order_item).transpose()
    }

    async fn restore_order_item_stock(&self, id: OrderItemId) -> Result<RestoreOutcome> {
        let mut tx = self.pool.begin().await?;

        // Claiming the item and crediting the product commit together, so a
        // retried job finds `restored_at` already set.
        let claimed = sqlx::query(
            "UPDATE order_items SET restored_at = NOW() \
             WHERE id = $1 AND restored_at IS NULL RETURNING product_id, quantity",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = claimed else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM order_items WHERE id = $1)")
                    .bind(id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;
            return if exists {
                Ok(RestoreOutcome::AlreadyRestored)
            } else {
                Err(StoreError::not_found("order item", id))
            };
        };

        let product_id = ProductId::from_uuid(row.try_get("product_id")?);
        let quantity = to_u32(row.try_get("quantity")?, "quantity")?;
        let new_stock = Self::credit_stock(&mut tx, product_id, quantity).await?;

        tx.commit().await?;
        Ok(RestoreOutcome::Restored {
            product_id,
            quantity,
            new_stock,
        })
    }

    async fn delete_order_item(&self, id: OrderItemId) -> Result<OrderItemRemoval> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT i.id, i.order_id, i.product_id, i.product_name, i.price, i.quantity, \
             i.restored_at, o.status AS order_status \
             FROM order_items i JOIN orders o ON o.id = i.order_id \
             WHERE i.id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("order item", id))?;
        let item = Self::row_to_order_item(&row)?;
        let status: OrderStatus = row.try_get::<String, _>("order_status")?.parse()?;

        let restore = item.restored_at.is_none()
            && !matches!(status, OrderStatus::Pending | OrderStatus::Cancelled);
        if restore {
            Self::credit_stock(&mut tx, item.product_id, item.quantity).await?;
        }

        sqlx::query("DELETE FROM order_items WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(OrderItemRemoval {
            item,
            stock_restored: restore,
        })
    }
    async fn count_orders_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE created_at < $1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
