//! Bot message texts and inline keyboards. Messages use Telegram HTML.
use crate::model::{Order, OrderItem, OrderStatus};
use crate::price::format_price;
use std::fmt::Write as _;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

const CALLBACK_PREFIX: &str = "order";

/// Escape the characters Telegram's HTML parse mode treats specially.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Admin notice for a new (or re-rendered) order.
pub fn format_new_order(order: &Order, items: &[OrderItem], city: &str, currency: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "🛒 <b>Order #{}</b> · {}",
        order.id,
        escape_html(order.status.label())
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "<b>Customer:</b> {}", escape_html(&order.customer_name));
    let _ = writeln!(out, "<b>Phone:</b> {}", escape_html(&order.phone));
    let _ = writeln!(out, "<b>City:</b> {}", escape_html(city));
    let _ = writeln!(out, "<b>Address:</b> {}", escape_html(&order.address));
    if let Some(comment) = order.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        let _ = writeln!(out, "<b>Comment:</b> {}", escape_html(comment));
    }
    let _ = writeln!(out);
    for item in items {
        let _ = writeln!(
            out,
            "• {} × {} = {}",
            escape_html(&item.title),
            item.quantity,
            format_price(item.unit_price.saturating_mul(item.quantity), currency)
        );
    }
    let _ = write!(out, "\n<b>Total:</b> {}", format_price(order.total, currency));
    out
}

/// Short customer-facing notice about a status change.
pub fn format_status_update(order_id: i64, status: OrderStatus) -> String {
    let line = match status {
        OrderStatus::New => "has been received.",
        OrderStatus::Confirmed => "is confirmed.",
        OrderStatus::Shipped => "is on its way.",
        OrderStatus::Completed => "is completed. Thank you!",
        OrderStatus::Cancelled => "was cancelled.",
    };
    format!("Your order <b>#{order_id}</b> {line}")
}

fn action_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::New => "↩️ New",
        OrderStatus::Confirmed => "✅ Confirm",
        OrderStatus::Shipped => "🚚 Shipped",
        OrderStatus::Completed => "📦 Completed",
        OrderStatus::Cancelled => "❌ Cancel",
    }
}

pub fn callback_data(order_id: i64, status: OrderStatus) -> String {
    format!("{CALLBACK_PREFIX}:{order_id}:{}", status.as_str())
}

/// Buttons for the statuses reachable from the current one; `None` for
/// final states.
pub fn order_keyboard(order: &Order) -> Option<InlineKeyboardMarkup> {
    let next = order.status.next();
    if next.is_empty() {
        return None;
    }
    let row: Vec<InlineKeyboardButton> = next
        .iter()
        .map(|st| InlineKeyboardButton::callback(action_label(*st), callback_data(order.id, *st)))
        .collect();
    Some(InlineKeyboardMarkup::new(vec![row]))
}

/// `order:<id>:<status>` → `(id, status)`.
pub fn parse_callback(data: &str) -> Option<(i64, OrderStatus)> {
    let mut parts = data.split(':');
    if parts.next()? != CALLBACK_PREFIX {
        return None;
    }
    let id = parts.next()?.parse::<i64>().ok()?;
    let status = OrderStatus::parse_status(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some((id, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: 17,
            tg_user_id: 42,
            customer_name: "Ann <script>".into(),
            phone: "+7 900 000-00-00".into(),
            city_id: 1,
            address: "Main st & 5th".into(),
            comment: Some("ring twice".into()),
            status,
            total: 135_000,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn items() -> Vec<OrderItem> {
        vec![OrderItem {
            id: 1,
            order_id: 17,
            product_id: "p1".into(),
            title: "Tea \"Gold\"".into(),
            quantity: 3,
            unit_price: 45_000,
        }]
    }

    #[test]
    fn new_order_message_is_escaped() {
        let text = format_new_order(&order(OrderStatus::New), &items(), "Moscow", "₽");
        assert!(text.contains("<b>Order #17</b> · New"));
        assert!(text.contains("Ann &lt;script&gt;"));
        assert!(text.contains("Main st &amp; 5th"));
        assert!(text.contains("• Tea &quot;Gold&quot; × 3 = 1 350 ₽"));
        assert!(text.contains("<b>Comment:</b> ring twice"));
        assert!(text.ends_with("<b>Total:</b> 1 350 ₽"));
    }

    #[test]
    fn status_update_texts() {
        assert_eq!(
            format_status_update(17, OrderStatus::Shipped),
            "Your order <b>#17</b> is on its way."
        );
        assert_eq!(
            format_status_update(17, OrderStatus::Completed),
            "Your order <b>#17</b> is completed. Thank you!"
        );
    }

    #[test]
    fn keyboard_follows_transitions() {
        let kb = order_keyboard(&order(OrderStatus::New)).unwrap();
        let data: Vec<String> = kb.inline_keyboard[0]
            .iter()
            .map(|b| match &b.kind {
                teloxide::types::InlineKeyboardButtonKind::CallbackData(d) => d.clone(),
                other => panic!("unexpected button {other:?}"),
            })
            .collect();
        assert_eq!(data, vec!["order:17:confirmed", "order:17:cancelled"]);
        assert!(order_keyboard(&order(OrderStatus::Completed)).is_none());
    }

    #[test]
    fn callback_parsing() {
        assert_eq!(parse_callback("order:17:shipped"), Some((17, OrderStatus::Shipped)));
        assert_eq!(parse_callback(&callback_data(5, OrderStatus::Cancelled)), Some((5, OrderStatus::Cancelled)));
        assert_eq!(parse_callback("order:x:shipped"), None);
        assert_eq!(parse_callback("order:1:lost"), None);
        assert_eq!(parse_callback("cart:1:new"), None);
        assert_eq!(parse_callback("order:1:new:extra"), None);
    }
}
