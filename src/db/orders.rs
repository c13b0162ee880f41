use super::Pool;
use crate::model::{Inventory, Order, OrderItem, OrderStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

const ORDER_COLUMNS: &str = "id, tg_user_id, customer_name, phone, city_id, address, comment, status, total, created_at, updated_at";

/// Order header as written by checkout.
#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub tg_user_id: i64,
    pub customer_name: &'a str,
    pub phone: &'a str,
    pub city_id: i64,
    pub address: &'a str,
    pub comment: Option<&'a str>,
    pub total: i64,
}

pub async fn insert_order(
    conn: &mut SqliteConnection,
    order: &NewOrder<'_>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO orders (tg_user_id, customer_name, phone, city_id, address, comment, status, total, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(order.tg_user_id)
    .bind(order.customer_name)
    .bind(order.phone)
    .bind(order.city_id)
    .bind(order.address)
    .bind(order.comment)
    .bind(OrderStatus::New.as_str())
    .bind(order.total)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// One order line. `stock_taken` records whether checkout decremented
/// inventory for it, so a cancel only returns what was taken.
pub async fn insert_order_item(
    conn: &mut SqliteConnection,
    order_id: i64,
    product_id: &str,
    title: &str,
    quantity: i64,
    unit_price: i64,
    stock_taken: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO order_items (order_id, product_id, title, quantity, unit_price, stock_taken) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(order_id)
    .bind(product_id)
    .bind(title)
    .bind(quantity)
    .bind(unit_price)
    .bind(stock_taken)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_inventory(
    conn: &mut SqliteConnection,
    product_id: &str,
    city_id: i64,
) -> Result<Option<Inventory>> {
    let row = sqlx::query_as::<_, Inventory>(
        "SELECT product_id, city_id, stock, price, updated_at FROM inventory WHERE product_id = ? AND city_id = ?",
    )
    .bind(product_id)
    .bind(city_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Decrement stock if enough is left. Returns `false` when the row is
/// missing or short.
pub async fn take_stock(
    conn: &mut SqliteConnection,
    product_id: &str,
    city_id: i64,
    quantity: i64,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE inventory SET stock = stock - ?1, updated_at = ?4 \
         WHERE product_id = ?2 AND city_id = ?3 AND stock >= ?1",
    )
    .bind(quantity)
    .bind(product_id)
    .bind(city_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Put back the stock taken by the items of `order_id`. Lines that were
/// sold without tracked stock are left alone.
pub async fn restock_order(conn: &mut SqliteConnection, order_id: i64, city_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE inventory SET stock = stock + ( \
             SELECT COALESCE(SUM(oi.quantity), 0) FROM order_items oi \
             WHERE oi.order_id = ?1 AND oi.stock_taken = 1 AND oi.product_id = inventory.product_id), \
           updated_at = ?3 \
         WHERE city_id = ?2 AND product_id IN ( \
             SELECT product_id FROM order_items WHERE order_id = ?1 AND stock_taken = 1)",
    )
    .bind(order_id)
    .bind(city_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Move an order from `from` to `to`. Returns `false` when the order is no
/// longer in `from` (changed concurrently or missing).
pub async fn update_order_status(
    conn: &mut SqliteConnection,
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<bool> {
    let res = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn get_order(pool: &Pool, id: i64) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
    let row = sqlx::query_as::<_, Order>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_order_tx(conn: &mut SqliteConnection, id: i64) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
    let row = sqlx::query_as::<_, Order>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn order_items(pool: &Pool, order_id: i64) -> Result<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, OrderItem>(
        "SELECT id, order_id, product_id, title, quantity, unit_price FROM order_items WHERE order_id = ? ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn list_orders_for_user(pool: &Pool, tg_user_id: i64) -> Result<Vec<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE tg_user_id = ? ORDER BY id DESC");
    let rows = sqlx::query_as::<_, Order>(&sql)
        .bind(tg_user_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn list_orders(
    pool: &Pool,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>> {
    let sql = format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2 OFFSET ?3"
    );
    let rows = sqlx::query_as::<_, Order>(&sql)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_city, create_product, init_pool, run_migrations, upsert_inventory, ProductUpsert};

    async fn setup() -> (Pool, i64) {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let city = create_city(&pool, "Kazan", 0).await.unwrap();
        create_product(
            &pool,
            &ProductUpsert {
                id: "p-1".into(),
                sku: None,
                title: "Oolong".into(),
                description: None,
                category: None,
                price: 300,
                is_active: true,
                image_url: None,
            },
        )
        .await
        .unwrap();
        upsert_inventory(&pool, "p-1", city.id, 5, None).await.unwrap();
        (pool, city.id)
    }

    fn new_order(city_id: i64) -> NewOrder<'static> {
        NewOrder {
            tg_user_id: 42,
            customer_name: "Ann",
            phone: "+79990000000",
            city_id,
            address: "Main st 1",
            comment: None,
            total: 600,
        }
    }

    #[tokio::test]
    async fn stock_is_taken_and_returned() {
        let (pool, city_id) = setup().await;
        let mut tx = pool.begin().await.unwrap();
        let id = insert_order(&mut tx, &new_order(city_id), Utc::now()).await.unwrap();
        insert_order_item(&mut tx, id, "p-1", "Oolong", 2, 300, true).await.unwrap();
        assert!(take_stock(&mut tx, "p-1", city_id, 2).await.unwrap());
        assert!(!take_stock(&mut tx, "p-1", city_id, 4).await.unwrap());
        assert_eq!(get_inventory(&mut tx, "p-1", city_id).await.unwrap().unwrap().stock, 3);

        restock_order(&mut tx, id, city_id).await.unwrap();
        assert_eq!(get_inventory(&mut tx, "p-1", city_id).await.unwrap().unwrap().stock, 5);
        tx.commit().await.unwrap();

        let items = order_items(&pool, id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2);
    }

    #[tokio::test]
    async fn restock_skips_lines_without_taken_stock() {
        let (pool, city_id) = setup().await;
        let mut tx = pool.begin().await.unwrap();
        let id = insert_order(&mut tx, &new_order(city_id), Utc::now()).await.unwrap();
        insert_order_item(&mut tx, id, "p-1", "Oolong", 2, 300, false).await.unwrap();
        restock_order(&mut tx, id, city_id).await.unwrap();
        assert_eq!(get_inventory(&mut tx, "p-1", city_id).await.unwrap().unwrap().stock, 5);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn status_update_is_conditional() {
        let (pool, city_id) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = insert_order(&mut conn, &new_order(city_id), Utc::now()).await.unwrap();
        assert!(!update_order_status(&mut conn, id, OrderStatus::Confirmed, OrderStatus::Shipped).await.unwrap());
        assert!(update_order_status(&mut conn, id, OrderStatus::New, OrderStatus::Confirmed).await.unwrap());
        assert_eq!(get_order_tx(&mut conn, id).await.unwrap().unwrap().status, OrderStatus::Confirmed);
        drop(conn);

        let confirmed = list_orders(&pool, Some(OrderStatus::Confirmed), 10, 0).await.unwrap();
        assert_eq!(confirmed.len(), 1);
        assert!(list_orders(&pool, Some(OrderStatus::New), 10, 0).await.unwrap().is_empty());
        assert_eq!(list_orders_for_user(&pool, 42).await.unwrap().len(), 1);
        assert!(list_orders_for_user(&pool, 7).await.unwrap().is_empty());
    }
}
