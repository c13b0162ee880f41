//! Row slices and write models used by repositories.
//!
//! Keep these structs focused on the data moved by queries. Business logic
//! lives in higher layers.

use serde::Deserialize;

/// Active product joined with the inventory row of one city.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CatalogRow {
    pub id: String,
    pub sku: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: i64,
    pub image_url: Option<String>,
    pub city_stock: Option<i64>,
    pub city_price: Option<i64>,
}

impl CatalogRow {
    /// Inventory override when present, else the base price.
    pub fn effective_price(&self) -> i64 {
        self.city_price.unwrap_or(self.price)
    }
}

/// Product write used by admin create and by the importer. `None` in an
/// optional column keeps the stored value on update (empty on insert).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductUpsert {
    pub id: String,
    pub sku: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: i64,
    pub is_active: bool,
    pub image_url: Option<String>,
}

/// Partial product update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductPatch {
    pub sku: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<i64>,
    pub is_active: Option<bool>,
    pub image_url: Option<String>,
}
