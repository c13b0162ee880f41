//! Checkout and order status management.
use crate::cart::{merge_items, CartItem, MAX_QUANTITY, MIN_QUANTITY};
use crate::db::{self, NewOrder, Pool};
use crate::model::{Order, OrderItem, OrderStatus, OutboxKind};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_LINES: usize = 50;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 ()\-.]*$").expect("phone regex is valid"));

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("{0}")]
    Invalid(String),
    #[error("city not found")]
    UnknownCity,
    #[error("product {0} is not available")]
    UnknownProduct(String),
    #[error("not enough {title} in stock: {available} left")]
    OutOfStock {
        product_id: String,
        title: String,
        available: i64,
    },
    #[error("order not found")]
    NotFound,
    #[error("cannot move order from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        OrderError::Storage(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOrder {
    pub city_id: i64,
    pub customer_name: String,
    pub phone: String,
    pub address: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub items: Vec<CartItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Phone numbers: optional leading `+`, digits and common separators,
/// 7 to 15 digits in total.
pub fn is_valid_phone(raw: &str) -> bool {
    let phone = raw.trim();
    if !PHONE_RE.is_match(phone) {
        return false;
    }
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    (7..=15).contains(&digits)
}

/// Field checks that need no database. Returns the merged cart lines.
pub fn validate(req: &SubmitOrder) -> Result<Vec<CartItem>, OrderError> {
    let name = req.customer_name.trim();
    if name.is_empty() {
        return Err(OrderError::Invalid("customer name is required".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(OrderError::Invalid(format!(
            "customer name is longer than {MAX_NAME_CHARS} characters"
        )));
    }
    if !is_valid_phone(&req.phone) {
        return Err(OrderError::Invalid("phone number is not valid".into()));
    }
    if req.address.trim().is_empty() {
        return Err(OrderError::Invalid("address is required".into()));
    }

    let lines = merge_items(&req.items);
    if lines.is_empty() {
        return Err(OrderError::Invalid("order has no items".into()));
    }
    if lines.len() > MAX_LINES {
        return Err(OrderError::Invalid(format!("order has more than {MAX_LINES} lines")));
    }
    if let Some(bad) = lines
        .iter()
        .find(|l| !(MIN_QUANTITY..=MAX_QUANTITY).contains(&l.quantity))
    {
        return Err(OrderError::Invalid(format!(
            "quantity of {} must be within {MIN_QUANTITY}..={MAX_QUANTITY}",
            bad.product_id
        )));
    }
    Ok(lines)
}

struct PricedLine {
    product_id: String,
    title: String,
    quantity: i64,
    unit_price: i64,
    limited_stock: bool,
}

/// Validate, price and store an order for `tg_user_id`. Stock is taken and
/// the admin notification queued in the same transaction as the insert.
#[instrument(skip_all, fields(tg_user_id = tg_user_id, city_id = req.city_id))]
pub async fn submit(pool: &Pool, tg_user_id: i64, req: &SubmitOrder) -> Result<OrderWithItems, OrderError> {
    let lines = validate(req)?;
    let city = db::get_city(pool, req.city_id)
        .await?
        .filter(|c| c.is_active)
        .ok_or(OrderError::UnknownCity)?;

    let mut priced = Vec::with_capacity(lines.len());
    let mut total = 0_i64;
    for line in lines {
        let row = db::get_catalog_product(pool, &line.product_id, Some(city.id))
            .await?
            .ok_or_else(|| OrderError::UnknownProduct(line.product_id.clone()))?;
        if let Some(available) = row.city_stock {
            if available < line.quantity {
                return Err(OrderError::OutOfStock {
                    product_id: row.id,
                    title: row.title,
                    available,
                });
            }
        }
        let unit_price = row.effective_price();
        total = unit_price
            .checked_mul(line.quantity)
            .and_then(|t| t.checked_add(total))
            .ok_or_else(|| OrderError::Invalid("order total is too large".into()))?;
        priced.push(PricedLine {
            product_id: row.id,
            title: row.title,
            quantity: line.quantity,
            unit_price,
            limited_stock: row.city_stock.is_some(),
        });
    }

    let now = Utc::now();
    let comment = req.comment.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let mut tx = pool.begin().await?;
    let order_id = db::insert_order(
        &mut *tx,
        &NewOrder {
            tg_user_id,
            customer_name: req.customer_name.trim(),
            phone: req.phone.trim(),
            city_id: city.id,
            address: req.address.trim(),
            comment,
            total,
        },
        now,
    )
    .await?;
    for line in &priced {
        db::insert_order_item(
            &mut *tx,
            order_id,
            &line.product_id,
            &line.title,
            line.quantity,
            line.unit_price,
            line.limited_stock,
        )
        .await?;
        if line.limited_stock
            && !db::take_stock(&mut *tx, &line.product_id, city.id, line.quantity).await?
        {
            // Sold out between pricing and now; the rollback undoes the insert.
            let available = db::get_inventory(&mut *tx, &line.product_id, city.id)
                .await?
                .map_or(0, |inv| inv.stock);
            return Err(OrderError::OutOfStock {
                product_id: line.product_id.clone(),
                title: line.title.clone(),
                available,
            });
        }
    }
    db::enqueue_outbox(&mut *tx, OutboxKind::NotifyNewOrder, order_id, None, now).await?;
    tx.commit().await?;

    info!(order_id, total, lines = priced.len(), "order submitted");
    get(pool, order_id).await?.ok_or(OrderError::NotFound)
}

pub async fn get(pool: &Pool, id: i64) -> Result<Option<OrderWithItems>, OrderError> {
    let Some(order) = db::get_order(pool, id).await? else {
        return Ok(None);
    };
    let items = db::order_items(pool, id).await?;
    Ok(Some(OrderWithItems { order, items }))
}

pub async fn list_for_user(pool: &Pool, tg_user_id: i64) -> Result<Vec<Order>, OrderError> {
    Ok(db::list_orders_for_user(pool, tg_user_id).await?)
}

pub async fn list(
    pool: &Pool,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>, OrderError> {
    Ok(db::list_orders(pool, status, limit.clamp(1, 200), offset.max(0)).await?)
}

/// Apply an admin status change. Cancelling returns the taken stock; every
/// change queues a customer notification.
#[instrument(skip_all, fields(order_id = id, to = to.as_str()))]
pub async fn set_status(pool: &Pool, id: i64, to: OrderStatus) -> Result<Order, OrderError> {
    let mut tx = pool.begin().await?;
    let order = db::get_order_tx(&mut *tx, id)
        .await?
        .ok_or(OrderError::NotFound)?;
    let from = order.status;
    if !from.can_transition_to(to) || !db::update_order_status(&mut *tx, id, from, to).await? {
        return Err(OrderError::InvalidTransition { from, to });
    }
    if to == OrderStatus::Cancelled {
        db::restock_order(&mut *tx, id, order.city_id).await?;
    }
    db::enqueue_outbox(&mut *tx, OutboxKind::NotifyStatus, id, Some(to), Utc::now()).await?;
    let updated = db::get_order_tx(&mut *tx, id)
        .await?
        .ok_or(OrderError::NotFound)?;
    tx.commit().await?;

    info!(order_id = id, from = from.as_str(), to = to.as_str(), "order status changed");
    Ok(updated)
}
