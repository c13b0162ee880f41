use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use teloxide::types::InlineKeyboardMarkup;
use tg_storefront::cart::CartItem;
use tg_storefront::config::{self, Config};
use tg_storefront::db::{self, Pool, ProductUpsert};
use tg_storefront::model::OrderStatus;
use tg_storefront::orders::{self, OrderError, SubmitOrder};
use tg_storefront::outbox::process_next_task;
use tg_storefront::telegram::Notifier;
use tokio::sync::Mutex;

const ADMIN: i64 = 1001;
const CUSTOMER: i64 = 42;

fn test_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// City "Moscow" with one limited (stock 3) and one unlimited product.
async fn seed_catalog(pool: &Pool) -> i64 {
    let city = db::create_city(pool, "Moscow", 0).await.unwrap();
    for (id, title, price) in [("p-tea", "Puer <aged>", 1200), ("p-cup", "Clay cup", 450)] {
        db::create_product(
            pool,
            &ProductUpsert {
                id: id.into(),
                sku: None,
                title: title.into(),
                description: None,
                category: Some("Tea".into()),
                price,
                is_active: true,
                image_url: None,
            },
        )
        .await
        .unwrap();
    }
    db::upsert_inventory(pool, "p-tea", city.id, 3, Some(1000))
        .await
        .unwrap();
    db::seed_admins(pool, &[ADMIN]).await.unwrap();
    city.id
}

fn order_request(city_id: i64, items: &[(&str, i64)]) -> SubmitOrder {
    SubmitOrder {
        city_id,
        customer_name: "Anna".into(),
        phone: "+7 (999) 123-45-67".into(),
        address: "Lenina 1".into(),
        comment: Some("  ".into()),
        items: items
            .iter()
            .map(|(id, q)| CartItem {
                product_id: id.to_string(),
                quantity: *q,
            })
            .collect(),
    }
}

#[derive(Debug, Clone)]
struct Sent {
    chat_id: i64,
    text: String,
    has_keyboard: bool,
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failures: Mutex<VecDeque<i64>>,
}

impl RecordingNotifier {
    fn failing_for(chat_ids: &[i64]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(chat_ids.iter().copied().collect()),
        }
    }

    async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send_html(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<()> {
        let mut failures = self.failures.lock().await;
        if let Some(pos) = failures.iter().position(|&id| id == chat_id) {
            failures.remove(pos);
            return Err(anyhow!("chat {chat_id} unreachable"));
        }
        self.sent.lock().await.push(Sent {
            chat_id,
            text: text.to_string(),
            has_keyboard: keyboard.is_some(),
        });
        Ok(())
    }
}

async fn stock(pool: &Pool, product_id: &str) -> i64 {
    db::list_inventory(pool, product_id).await.unwrap()[0].stock
}

#[tokio::test]
async fn order_notifies_admins_then_customer() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let city_id = seed_catalog(&pool).await;
    let notifier = RecordingNotifier::default();

    let placed = orders::submit(
        &pool,
        CUSTOMER,
        &order_request(city_id, &[("p-tea", 2), ("p-cup", 1), ("p-tea", 1)]),
    )
    .await
    .unwrap();
    assert_eq!(placed.order.status, OrderStatus::New);
    assert_eq!(placed.order.total, 3 * 1000 + 450);
    assert_eq!(placed.order.comment, None);
    assert_eq!(placed.items.len(), 2);
    assert_eq!(stock(&pool, "p-tea").await, 0);

    assert!(process_next_task(&pool, &notifier, &cfg).await.unwrap());
    assert!(!process_next_task(&pool, &notifier, &cfg).await.unwrap());

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, ADMIN);
    assert!(sent[0].has_keyboard);
    assert!(sent[0].text.contains("Puer &lt;aged&gt;"));
    assert!(sent[0].text.contains("Moscow"));

    orders::set_status(&pool, placed.order.id, OrderStatus::Confirmed)
        .await
        .unwrap();
    assert!(process_next_task(&pool, &notifier, &cfg).await.unwrap());

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].chat_id, CUSTOMER);
    assert!(!sent[1].has_keyboard);
    assert!(sent[1].text.contains("is confirmed"));
    assert_eq!(db::count_outbox(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn out_of_stock_order_is_rejected_without_side_effects() {
    let pool = setup_pool().await;
    let city_id = seed_catalog(&pool).await;

    let err = orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("p-tea", 4)]))
        .await
        .unwrap_err();
    match err {
        OrderError::OutOfStock { available, .. } => assert_eq!(available, 3),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(stock(&pool, "p-tea").await, 3);
    assert!(orders::list_for_user(&pool, CUSTOMER).await.unwrap().is_empty());
    assert_eq!(db::count_outbox(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_city_and_product_are_rejected() {
    let pool = setup_pool().await;
    let city_id = seed_catalog(&pool).await;

    let err = orders::submit(&pool, CUSTOMER, &order_request(city_id + 100, &[("p-cup", 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::UnknownCity));

    let err = orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("nope", 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::UnknownProduct(id) if id == "nope"));
}

#[tokio::test]
async fn cancel_returns_stock_and_closes_order() {
    let pool = setup_pool().await;
    let city_id = seed_catalog(&pool).await;

    let placed = orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("p-tea", 2)]))
        .await
        .unwrap();
    assert_eq!(stock(&pool, "p-tea").await, 1);

    let cancelled = orders::set_status(&pool, placed.order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock(&pool, "p-tea").await, 3);

    let err = orders::set_status(&pool, placed.order.id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::InvalidTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Confirmed
        }
    ));
    // Rejected changes leave stock and outbox untouched.
    assert_eq!(stock(&pool, "p-tea").await, 3);
    assert_eq!(db::count_outbox(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn skipping_a_step_is_an_invalid_transition() {
    let pool = setup_pool().await;
    let city_id = seed_catalog(&pool).await;
    let placed = orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("p-cup", 1)]))
        .await
        .unwrap();

    let err = orders::set_status(&pool, placed.order.id, OrderStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::InvalidTransition { .. }));

    let err = orders::set_status(&pool, placed.order.id + 1, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::NotFound));
}

#[tokio::test]
async fn failed_delivery_backs_off() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let city_id = seed_catalog(&pool).await;
    let notifier = RecordingNotifier::failing_for(&[ADMIN]);

    orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("p-cup", 1)]))
        .await
        .unwrap();

    assert!(process_next_task(&pool, &notifier, &cfg).await.unwrap());
    assert!(notifier.sent().await.is_empty());
    assert_eq!(db::count_outbox(&pool).await.unwrap(), 1);
    // Rescheduled into the future, so nothing is due right now.
    assert!(!process_next_task(&pool, &notifier, &cfg).await.unwrap());

    let attempt: i64 = sqlx::query_scalar("SELECT attempt FROM outbox")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(attempt, 1);
}

#[tokio::test]
async fn one_reachable_admin_is_enough() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let city_id = seed_catalog(&pool).await;
    db::add_admin(&pool, 2002, Some("Second")).await.unwrap();
    let notifier = Arc::new(RecordingNotifier::failing_for(&[ADMIN]));

    orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("p-cup", 1)]))
        .await
        .unwrap();
    assert!(process_next_task(&pool, notifier.as_ref(), &cfg).await.unwrap());

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, 2002);
    assert_eq!(db::count_outbox(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_does_not_restock_untracked_lines() {
    let pool = setup_pool().await;
    let city_id = seed_catalog(&pool).await;

    let placed = orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("p-cup", 2)]))
        .await
        .unwrap();
    // Stock tracking starts after the order was placed.
    db::upsert_inventory(&pool, "p-cup", city_id, 2, None)
        .await
        .unwrap();

    orders::set_status(&pool, placed.order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(stock(&pool, "p-cup").await, 2);
}

#[tokio::test]
async fn queued_status_notifications_keep_their_own_status() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let city_id = seed_catalog(&pool).await;
    let notifier = RecordingNotifier::default();

    let placed = orders::submit(&pool, CUSTOMER, &order_request(city_id, &[("p-cup", 1)]))
        .await
        .unwrap();
    orders::set_status(&pool, placed.order.id, OrderStatus::Confirmed)
        .await
        .unwrap();
    orders::set_status(&pool, placed.order.id, OrderStatus::Shipped)
        .await
        .unwrap();

    while process_next_task(&pool, &notifier, &cfg).await.unwrap() {}

    let to_customer: Vec<String> = notifier
        .sent()
        .await
        .into_iter()
        .filter(|s| s.chat_id == CUSTOMER)
        .map(|s| s.text)
        .collect();
    assert_eq!(to_customer.len(), 2);
    assert!(to_customer[0].contains("is confirmed"));
    assert!(to_customer[1].contains("is on its way"));
}
