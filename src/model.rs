use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Confirmed,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::New,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::New => "New",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Statuses reachable from `self` in one step.
    pub fn next(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::New => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Completed],
            OrderStatus::Completed | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        self.next().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxKind {
    NotifyNewOrder,
    NotifyStatus,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::NotifyNewOrder => "notify_new_order",
            OutboxKind::NotifyStatus => "notify_status",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "notify_new_order" => Some(OutboxKind::NotifyNewOrder),
            "notify_status" => Some(OutboxKind::NotifyStatus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct City {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub sku: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    /// Base price in minor units.
    pub price: i64,
    pub is_active: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Inventory {
    pub product_id: String,
    pub city_id: i64,
    pub stock: i64,
    /// Per-city price override in minor units.
    pub price: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub tg_user_id: i64,
    pub customer_name: String,
    pub phone: String,
    pub city_id: i64,
    pub address: String,
    pub comment: Option<String>,
    pub status: OrderStatus,
    pub total: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: String,
    pub title: String,
    pub quantity: i64,
    pub unit_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Admin {
    pub tg_user_id: i64,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxTask {
    pub id: i64,
    pub kind: OutboxKind,
    pub ref_id: i64,
    /// Status at the time of the change, for status notifications.
    pub status: Option<OrderStatus>,
    pub attempt: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for st in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse_status(st.as_str()), Some(st));
        }
        assert_eq!(OrderStatus::parse_status("lost"), None);
    }

    #[test]
    fn status_transitions() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
