//! Server-side pricing of a client cart.
use crate::db::{self, Pool};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const MIN_QUANTITY: i64 = 1;
pub const MAX_QUANTITY: i64 = 99;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub city_id: i64,
    pub items: Vec<CartItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteLine {
    pub product_id: String,
    pub title: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_total: i64,
    /// City stock when an inventory row limits it.
    pub stock: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartProblem {
    UnknownProduct { product_id: String },
    InvalidQuantity { product_id: String, quantity: i64 },
    InsufficientStock { product_id: String, requested: i64, available: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub city_id: i64,
    pub lines: Vec<QuoteLine>,
    pub total: i64,
    pub problems: Vec<CartProblem>,
}

impl Quote {
    pub fn is_orderable(&self) -> bool {
        self.problems.is_empty() && !self.lines.is_empty()
    }
}

/// Sum quantities of repeated product ids, keeping first-seen order.
pub fn merge_items(items: &[CartItem]) -> Vec<CartItem> {
    let mut merged: Vec<CartItem> = Vec::with_capacity(items.len());
    for item in items {
        let id = item.product_id.trim();
        match merged.iter_mut().find(|m| m.product_id == id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => merged.push(CartItem {
                product_id: id.to_string(),
                quantity: item.quantity,
            }),
        }
    }
    merged
}

/// Price `items` for `city_id`. Lines with problems are left out of the
/// total and reported instead.
#[instrument(skip_all, fields(city_id = city_id))]
pub async fn quote(pool: &Pool, city_id: i64, items: &[CartItem]) -> Result<Quote> {
    let mut lines = Vec::new();
    let mut problems = Vec::new();
    let mut total = 0_i64;

    for item in merge_items(items) {
        if !(MIN_QUANTITY..=MAX_QUANTITY).contains(&item.quantity) {
            problems.push(CartProblem::InvalidQuantity {
                product_id: item.product_id,
                quantity: item.quantity,
            });
            continue;
        }
        let Some(row) = db::get_catalog_product(pool, &item.product_id, Some(city_id)).await? else {
            problems.push(CartProblem::UnknownProduct {
                product_id: item.product_id,
            });
            continue;
        };
        if let Some(available) = row.city_stock {
            if available < item.quantity {
                problems.push(CartProblem::InsufficientStock {
                    product_id: item.product_id,
                    requested: item.quantity,
                    available,
                });
                continue;
            }
        }
        let unit_price = row.effective_price();
        let line_total = unit_price.saturating_mul(item.quantity);
        total = total.saturating_add(line_total);
        lines.push(QuoteLine {
            product_id: row.id,
            title: row.title,
            quantity: item.quantity,
            unit_price,
            line_total,
            stock: row.city_stock,
        });
    }

    Ok(Quote {
        city_id,
        lines,
        total,
        problems,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, run_migrations, ProductUpsert};

    fn item(id: &str, quantity: i64) -> CartItem {
        CartItem {
            product_id: id.into(),
            quantity,
        }
    }

    #[test]
    fn duplicates_are_merged_in_order() {
        let merged = merge_items(&[item("b", 1), item("a", 2), item(" b ", 3)]);
        assert_eq!(merged, vec![item("b", 4), item("a", 2)]);
    }

    #[tokio::test]
    async fn quote_prices_and_reports_problems() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let city = db::create_city(&pool, "Moscow", 0).await.unwrap();
        for (id, price) in [("tea", 500), ("coffee", 900)] {
            db::create_product(
                &pool,
                &ProductUpsert {
                    id: id.into(),
                    sku: None,
                    title: id.into(),
                    description: None,
                    category: None,
                    price,
                    is_active: true,
                    image_url: None,
                },
            )
            .await
            .unwrap();
        }
        db::upsert_inventory(&pool, "tea", city.id, 10, Some(450)).await.unwrap();
        db::upsert_inventory(&pool, "coffee", city.id, 1, None).await.unwrap();

        let q = quote(
            &pool,
            city.id,
            &[item("tea", 2), item("coffee", 2), item("ghost", 1), item("tea", 1), item("x", 0)],
        )
        .await
        .unwrap();

        assert_eq!(q.lines.len(), 1);
        assert_eq!(q.lines[0].quantity, 3);
        assert_eq!(q.lines[0].unit_price, 450);
        assert_eq!(q.total, 1350);
        assert!(!q.is_orderable());
        assert_eq!(
            q.problems,
            vec![
                CartProblem::InsufficientStock {
                    product_id: "coffee".into(),
                    requested: 2,
                    available: 1
                },
                CartProblem::UnknownProduct {
                    product_id: "ghost".into()
                },
                CartProblem::InvalidQuantity {
                    product_id: "x".into(),
                    quantity: 0
                },
            ]
        );
    }
}
