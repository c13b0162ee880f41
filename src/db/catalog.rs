use super::model::{CatalogRow, ProductPatch, ProductUpsert};
use super::Pool;
use crate::model::{City, Inventory, Product};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::instrument;

const PRODUCT_COLUMNS: &str = "id, sku, title, description, category, price, is_active, image_url, created_at, updated_at";

#[instrument(skip_all)]
pub async fn list_cities(pool: &Pool, include_inactive: bool) -> Result<Vec<City>> {
    let rows = sqlx::query_as::<_, City>(
        "SELECT id, name, is_active, sort_order FROM cities WHERE is_active = 1 OR ?1 ORDER BY sort_order, name",
    )
    .bind(include_inactive)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_city(pool: &Pool, id: i64) -> Result<Option<City>> {
    let row = sqlx::query_as::<_, City>("SELECT id, name, is_active, sort_order FROM cities WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

#[instrument(skip_all)]
pub async fn create_city(pool: &Pool, name: &str, sort_order: i64) -> Result<City> {
    let city = sqlx::query_as::<_, City>(
        "INSERT INTO cities (name, sort_order) VALUES (?, ?) RETURNING id, name, is_active, sort_order",
    )
    .bind(name)
    .bind(sort_order)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to create city {name}"))?;
    Ok(city)
}

#[instrument(skip_all)]
pub async fn update_city(
    pool: &Pool,
    id: i64,
    name: Option<&str>,
    is_active: Option<bool>,
    sort_order: Option<i64>,
) -> Result<Option<City>> {
    let city = sqlx::query_as::<_, City>(
        "UPDATE cities SET name = COALESCE(?, name), is_active = COALESCE(?, is_active), sort_order = COALESCE(?, sort_order) \
         WHERE id = ? RETURNING id, name, is_active, sort_order",
    )
    .bind(name)
    .bind(is_active)
    .bind(sort_order)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(city)
}

/// Active products with the inventory row of `city_id` (if any).
#[instrument(skip_all)]
pub async fn list_catalog(
    pool: &Pool,
    city_id: Option<i64>,
    category: Option<&str>,
) -> Result<Vec<CatalogRow>> {
    let rows = sqlx::query_as::<_, CatalogRow>(
        "SELECT p.id, p.sku, p.title, p.description, p.category, p.price, p.image_url, \
                i.stock AS city_stock, i.price AS city_price \
         FROM products p \
         LEFT JOIN inventory i ON i.product_id = p.id AND i.city_id = ?1 \
         WHERE p.is_active = 1 AND (?2 IS NULL OR p.category = ?2) \
         ORDER BY p.category, p.title",
    )
    .bind(city_id)
    .bind(category)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_catalog_product(
    pool: &Pool,
    id: &str,
    city_id: Option<i64>,
) -> Result<Option<CatalogRow>> {
    let row = sqlx::query_as::<_, CatalogRow>(
        "SELECT p.id, p.sku, p.title, p.description, p.category, p.price, p.image_url, \
                i.stock AS city_stock, i.price AS city_price \
         FROM products p \
         LEFT JOIN inventory i ON i.product_id = p.id AND i.city_id = ?1 \
         WHERE p.is_active = 1 AND p.id = ?2",
    )
    .bind(city_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_categories(pool: &Pool) -> Result<Vec<String>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT category FROM products WHERE is_active = 1 AND category <> '' ORDER BY category",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_products(pool: &Pool) -> Result<Vec<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY category, title");
    let rows = sqlx::query_as::<_, Product>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

pub async fn get_product(pool: &Pool, id: &str) -> Result<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?");
    let row = sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Insert or update one product keyed by id. Returns `true` when a new row
/// was created.
pub async fn upsert_product(
    conn: &mut SqliteConnection,
    product: &ProductUpsert,
    now: DateTime<Utc>,
) -> Result<bool> {
    let existed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE id = ?")
        .bind(&product.id)
        .fetch_one(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO products (id, sku, title, description, category, price, is_active, image_url, created_at, updated_at) \
         VALUES (?1, ?2, ?3, COALESCE(?4, ''), COALESCE(?5, ''), ?6, ?7, ?8, ?9, ?9) \
         ON CONFLICT(id) DO UPDATE SET \
            sku = COALESCE(?2, products.sku), \
            title = ?3, \
            description = COALESCE(?4, products.description), \
            category = COALESCE(?5, products.category), \
            price = ?6, \
            is_active = ?7, \
            image_url = COALESCE(?8, products.image_url), \
            updated_at = ?9",
    )
    .bind(&product.id)
    .bind(&product.sku)
    .bind(&product.title)
    .bind(&product.description)
    .bind(&product.category)
    .bind(product.price)
    .bind(product.is_active)
    .bind(&product.image_url)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert product {}", product.id))?;
    Ok(existed == 0)
}

#[instrument(skip_all)]
pub async fn create_product(pool: &Pool, product: &ProductUpsert) -> Result<Product> {
    let mut conn = pool.acquire().await?;
    upsert_product(&mut conn, product, Utc::now()).await?;
    drop(conn);
    get_product(pool, &product.id)
        .await?
        .context("product vanished after insert")
}

#[instrument(skip_all)]
pub async fn update_product(pool: &Pool, id: &str, patch: &ProductPatch) -> Result<Option<Product>> {
    let sql = format!(
        "UPDATE products SET \
            sku = COALESCE(?, sku), title = COALESCE(?, title), description = COALESCE(?, description), \
            category = COALESCE(?, category), price = COALESCE(?, price), is_active = COALESCE(?, is_active), \
            image_url = COALESCE(?, image_url), updated_at = ? \
         WHERE id = ? RETURNING {PRODUCT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, Product>(&sql)
        .bind(&patch.sku)
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(&patch.category)
        .bind(patch.price)
        .bind(patch.is_active)
        .bind(&patch.image_url)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

#[instrument(skip_all)]
pub async fn delete_product(pool: &Pool, id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn set_product_image(pool: &Pool, id: &str, image_url: &str) -> Result<bool> {
    let res = sqlx::query("UPDATE products SET image_url = ?, updated_at = ? WHERE id = ?")
        .bind(image_url)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Map of `sku -> product id` for every product with a sku.
pub async fn product_ids_by_sku(pool: &Pool) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT sku, id FROM products WHERE sku IS NOT NULL")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

#[instrument(skip_all)]
pub async fn upsert_inventory(
    pool: &Pool,
    product_id: &str,
    city_id: i64,
    stock: i64,
    price: Option<i64>,
) -> Result<Inventory> {
    let row = sqlx::query_as::<_, Inventory>(
        "INSERT INTO inventory (product_id, city_id, stock, price, updated_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(product_id, city_id) DO UPDATE SET \
            stock = excluded.stock, price = excluded.price, updated_at = excluded.updated_at \
         RETURNING product_id, city_id, stock, price, updated_at",
    )
    .bind(product_id)
    .bind(city_id)
    .bind(stock)
    .bind(price)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert inventory {product_id}/{city_id}"))?;
    Ok(row)
}

/// Import flavour of [`upsert_inventory`]: `None` keeps the stored value.
/// Without a stock figure only an existing row is touched, since a new row
/// would need an invented stock. Returns whether a row was written.
pub async fn merge_inventory(
    conn: &mut SqliteConnection,
    product_id: &str,
    city_id: i64,
    stock: Option<i64>,
    price: Option<i64>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = match stock {
        Some(_) => sqlx::query(
            "INSERT INTO inventory (product_id, city_id, stock, price, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(product_id, city_id) DO UPDATE SET \
                stock = ?3, \
                price = COALESCE(?4, inventory.price), \
                updated_at = ?5",
        ),
        None => sqlx::query(
            "UPDATE inventory SET price = COALESCE(?4, price), updated_at = ?5 \
             WHERE product_id = ?1 AND city_id = ?2",
        ),
    };
    let res = query
        .bind(product_id)
        .bind(city_id)
        .bind(stock)
        .bind(price)
        .bind(now)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to merge inventory {product_id}/{city_id}"))?;
    Ok(res.rows_affected() > 0)
}

pub async fn delete_inventory(pool: &Pool, product_id: &str, city_id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM inventory WHERE product_id = ? AND city_id = ?")
        .bind(product_id)
        .bind(city_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn list_inventory(pool: &Pool, product_id: &str) -> Result<Vec<Inventory>> {
    let rows = sqlx::query_as::<_, Inventory>(
        "SELECT product_id, city_id, stock, price, updated_at FROM inventory WHERE product_id = ? ORDER BY city_id",
    )
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
