//! REST API for the mini-app and the admin back office.
mod admin;
mod catalog;
mod error;
mod orders;

pub use error::AppError;

use crate::config::Config;
use crate::db::Pool;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    /// Outbound client for image downloads.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pool: Pool, config: Arc<Config>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("tg-storefront/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self { pool, config, http })
    }
}

pub fn router(state: AppState) -> Router {
    let images_dir = state.config.images_dir();
    let body_limit = state.config.http.max_upload_bytes + MULTIPART_OVERHEAD;

    let admin = Router::new()
        .route("/me", get(admin::me))
        .route("/orders", get(admin::list_orders))
        .route("/orders/{id}", get(admin::get_order))
        .route("/orders/{id}/status", patch(admin::set_order_status))
        .route("/products", get(admin::list_products).post(admin::create_product))
        .route(
            "/products/{id}",
            patch(admin::update_product).delete(admin::delete_product),
        )
        .route("/products/{id}/inventory", get(admin::product_inventory))
        .route("/products/{id}/image", post(admin::upload_image))
        .route("/products/{id}/image-url", post(admin::image_from_url))
        .route("/inventory", put(admin::put_inventory))
        .route("/inventory/{product_id}/{city_id}", delete(admin::delete_inventory))
        .route("/import", post(admin::import))
        .route("/admins", get(admin::list_admins).post(admin::add_admin))
        .route("/admins/{tg_user_id}", delete(admin::remove_admin))
        .route("/cities", get(admin::list_cities).post(admin::create_city))
        .route("/cities/{id}", patch(admin::update_city));

    let api = Router::new()
        .route("/cities", get(catalog::cities))
        .route("/categories", get(catalog::categories))
        .route("/products", get(catalog::products))
        .route("/products/{id}", get(catalog::product))
        .route("/cart/quote", post(catalog::quote))
        .route("/orders", post(orders::submit).get(orders::my_orders))
        .route("/orders/{id}", get(orders::my_order))
        .nest("/admin", admin);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .nest_service("/images", ServeDir::new(images_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Bind `http.bind` and serve until the process stops.
pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.config.http.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "http server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
