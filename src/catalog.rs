//! Customer-facing catalog views.
use crate::db::{self, CatalogRow, Pool};
use crate::images;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogQuery {
    pub city_id: Option<i64>,
    pub category: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    pub id: String,
    pub sku: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    /// Effective price for the requested city.
    pub price: i64,
    pub base_price: i64,
    /// City stock; `None` without a city or without an inventory row.
    pub stock: Option<i64>,
    pub in_stock: bool,
    /// Absolute URL of the stored image.
    pub image_url: Option<String>,
    pub image_candidates: Vec<String>,
}

impl ProductView {
    pub fn from_row(row: CatalogRow, public_url: &str) -> Self {
        let price = row.effective_price();
        let image_candidates = images::candidates(row.image_url.as_deref(), &row.id, public_url);
        let image_url = row
            .image_url
            .as_deref()
            .and_then(|u| images::resolve(u, public_url));
        Self {
            price,
            base_price: row.price,
            stock: row.city_stock,
            in_stock: row.city_stock.map_or(true, |s| s > 0),
            image_candidates,
            id: row.id,
            sku: row.sku,
            title: row.title,
            description: row.description,
            category: row.category,
            image_url,
        }
    }
}

/// Case-insensitive substring match on title or sku. Done here rather than
/// in SQL because SQLite's `lower()` only folds ASCII.
pub fn matches_query(row: &CatalogRow, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    row.title.to_lowercase().contains(&needle)
        || row
            .sku
            .as_deref()
            .is_some_and(|sku| sku.to_lowercase().contains(&needle))
}

pub async fn list_products(pool: &Pool, public_url: &str, query: &CatalogQuery) -> Result<Vec<ProductView>> {
    let category = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let rows = db::list_catalog(pool, query.city_id, category).await?;
    let q = query.q.as_deref().unwrap_or("");
    Ok(rows
        .into_iter()
        .filter(|row| matches_query(row, q))
        .map(|row| ProductView::from_row(row, public_url))
        .collect())
}

pub async fn get_product(
    pool: &Pool,
    public_url: &str,
    id: &str,
    city_id: Option<i64>,
) -> Result<Option<ProductView>> {
    let row = db::get_catalog_product(pool, id, city_id).await?;
    Ok(row.map(|r| ProductView::from_row(r, public_url)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str, sku: Option<&str>, stock: Option<i64>) -> CatalogRow {
        CatalogRow {
            id: "p1".into(),
            sku: sku.map(str::to_string),
            title: title.into(),
            description: String::new(),
            category: "Tea".into(),
            price: 500,
            image_url: None,
            city_stock: stock,
            city_price: None,
        }
    }

    #[test]
    fn query_matches_title_and_sku_ignoring_case() {
        let r = row("Зелёный ЧАЙ", Some("GT-100"), None);
        assert!(matches_query(&r, "чай"));
        assert!(matches_query(&r, "gt-1"));
        assert!(matches_query(&r, "  "));
        assert!(!matches_query(&r, "coffee"));
    }

    #[test]
    fn stock_flags() {
        let base = "https://shop.example.com";
        assert!(ProductView::from_row(row("Tea", None, None), base).in_stock);
        assert!(ProductView::from_row(row("Tea", None, Some(2)), base).in_stock);
        let sold_out = ProductView::from_row(row("Tea", None, Some(0)), base);
        assert!(!sold_out.in_stock);
        assert_eq!(sold_out.stock, Some(0));
        assert_eq!(sold_out.image_candidates.len(), 3);
    }
}
