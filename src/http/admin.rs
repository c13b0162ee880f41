//! Admin back office endpoints. Every handler takes [`AdminUser`].
use super::{AppError, AppState};
use crate::auth::AdminUser;
use crate::db::{self, ProductPatch, ProductUpsert};
use crate::images;
use crate::import::{self, ImportOptions, ImportReport};
use crate::model::{Admin, City, Inventory, Order, OrderStatus, Product};
use crate::orders::{self, OrderWithItems};
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use url::Url;
use uuid::Uuid;

const DEFAULT_PAGE: i64 = 50;

pub async fn me(AdminUser(user): AdminUser) -> Json<Value> {
    Json(json!({
        "tg_user_id": user.id,
        "name": user.display_name(),
        "username": user.username,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<OrderListQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let status = match q.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            OrderStatus::parse_status(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status {raw:?}")))?,
        ),
        None => None,
    };
    let rows = orders::list(
        &state.pool,
        status,
        q.limit.unwrap_or(DEFAULT_PAGE),
        q.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(rows))
}

pub async fn get_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderWithItems>, AppError> {
    orders::get(&state.pool, id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("order"))
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

pub async fn set_order_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Json(body): Json<StatusChange>,
) -> Result<Json<Order>, AppError> {
    let order = orders::set_status(&state.pool, id, body.status).await?;
    info!(order_id = id, admin = admin.id, status = body.status.as_str(), "status changed via api");
    Ok(Json(order))
}

pub async fn list_products(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<Product>>, AppError> {
    Ok(Json(db::list_products(&state.pool).await?))
}

#[derive(Debug, Deserialize)]
pub struct NewProduct {
    pub id: Option<String>,
    pub sku: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Minor units.
    pub price: i64,
    pub is_active: Option<bool>,
    pub image_url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub async fn create_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::Unprocessable("title is required".into()));
    }
    if body.price < 0 {
        return Err(AppError::Unprocessable("price must not be negative".into()));
    }
    let id = match non_empty(body.id) {
        Some(raw) => Uuid::parse_str(&raw)
            .map_err(|_| AppError::Unprocessable("id must be a UUID".into()))?
            .hyphenated()
            .to_string(),
        None => Uuid::new_v4().to_string(),
    };
    if db::get_product(&state.pool, &id).await?.is_some() {
        return Err(AppError::Conflict(format!("product {id} already exists")));
    }
    let product = db::create_product(
        &state.pool,
        &ProductUpsert {
            id,
            sku: non_empty(body.sku),
            title: title.to_string(),
            description: body.description,
            category: body.category.map(|c| c.trim().to_string()),
            price: body.price,
            is_active: body.is_active.unwrap_or(true),
            image_url: non_empty(body.image_url),
        },
    )
    .await?;
    info!(product_id = %product.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(mut patch): Json<ProductPatch>,
) -> Result<Json<Product>, AppError> {
    if let Some(title) = patch.title.as_mut() {
        *title = title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Unprocessable("title must not be empty".into()));
        }
    }
    if patch.price.is_some_and(|p| p < 0) {
        return Err(AppError::Unprocessable("price must not be negative".into()));
    }
    db::update_product(&state.pool, &id, &patch)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("product"))
}

pub async fn delete_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if db::delete_product(&state.pool, &id).await? {
        info!(product_id = %id, "product deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("product"))
    }
}

pub async fn product_inventory(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Inventory>>, AppError> {
    if db::get_product(&state.pool, &id).await?.is_none() {
        return Err(AppError::NotFound("product"));
    }
    Ok(Json(db::list_inventory(&state.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct InventoryUpsert {
    pub product_id: String,
    pub city_id: i64,
    pub stock: i64,
    pub price: Option<i64>,
}

pub async fn put_inventory(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<InventoryUpsert>,
) -> Result<Json<Inventory>, AppError> {
    if body.stock < 0 {
        return Err(AppError::Unprocessable("stock must not be negative".into()));
    }
    if body.price.is_some_and(|p| p < 0) {
        return Err(AppError::Unprocessable("price must not be negative".into()));
    }
    let row = db::upsert_inventory(&state.pool, &body.product_id, body.city_id, body.stock, body.price).await?;
    Ok(Json(row))
}

pub async fn delete_inventory(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path((product_id, city_id)): Path<(String, i64)>,
) -> Result<StatusCode, AppError> {
    if db::delete_inventory(&state.pool, &product_id, city_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("inventory row"))
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(err.body_text())
    }
}

/// The `file` field of a multipart upload, read into memory.
struct Upload {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Bytes,
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Upload {
            file_name,
            content_type,
            bytes,
        });
    }
    Err(AppError::BadRequest("multipart field \"file\" is missing".into()))
}

/// Validate image bytes and store them; returns the extension-checked
/// public path.
async fn save_image(state: &AppState, declared_type: Option<&str>, bytes: &[u8]) -> Result<String, AppError> {
    if bytes.len() > state.config.http.max_upload_bytes {
        return Err(AppError::PayloadTooLarge);
    }
    if let Some(ct) = declared_type.filter(|ct| !ct.starts_with("application/octet-stream")) {
        if images::extension_for_content_type(ct).is_none() {
            return Err(AppError::Unprocessable(format!(
                "unsupported content type {ct}; use JPEG, PNG or WebP"
            )));
        }
    }
    let ext = images::sniff_image(bytes)
        .ok_or_else(|| AppError::Unprocessable("file is not a JPEG, PNG or WebP image".into()))?;
    Ok(images::store_image(&state.config.images_dir(), bytes, ext).await?)
}

async fn attach_image(state: &AppState, id: &str, url: &str) -> Result<Product, AppError> {
    db::set_product_image(&state.pool, id, url).await?;
    info!(product_id = %id, image = %url, "product image updated");
    db::get_product(&state.pool, id)
        .await?
        .ok_or(AppError::NotFound("product"))
}

pub async fn upload_image(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Product>, AppError> {
    if db::get_product(&state.pool, &id).await?.is_none() {
        return Err(AppError::NotFound("product"));
    }
    let upload = read_file_field(&mut multipart).await?;
    let url = save_image(&state, upload.content_type.as_deref(), &upload.bytes).await?;
    Ok(Json(attach_image(&state, &id, &url).await?))
}

#[derive(Debug, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

pub async fn image_from_url(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(body): Json<ImageUrl>,
) -> Result<Json<Product>, AppError> {
    let url = Url::parse(body.url.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .ok_or_else(|| AppError::BadRequest("url must be an absolute http(s) URL".into()))?;
    if db::get_product(&state.pool, &id).await?.is_none() {
        return Err(AppError::NotFound("product"));
    }

    let limit = state.config.http.max_upload_bytes;
    let mut resp = state
        .http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| AppError::BadGateway(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(AppError::BadGateway(format!("{url} answered {}", resp.status())));
    }
    if resp.content_length().is_some_and(|n| n as usize > limit) {
        return Err(AppError::PayloadTooLarge);
    }
    let declared = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut bytes = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| AppError::BadGateway(e.to_string()))?
    {
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    let path = save_image(&state, declared.as_deref(), &bytes).await?;
    Ok(Json(attach_image(&state, &id, &path).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportQuery {
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn import(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(q): Query<ImportQuery>,
    mut multipart: Multipart,
) -> Result<Json<ImportReport>, AppError> {
    let Upload {
        file_name, bytes, ..
    } = read_file_field(&mut multipart).await?;
    if bytes.len() > state.config.http.max_upload_bytes {
        return Err(AppError::PayloadTooLarge);
    }
    info!(admin = admin.id, file = ?file_name, size = bytes.len(), dry_run = q.dry_run, "import via api");
    let opts = ImportOptions {
        batch_size: state.config.import.batch_size,
        dry_run: q.dry_run,
    };
    let report = import::run_import(&state.pool, bytes.to_vec(), file_name.as_deref(), &opts).await?;
    Ok(Json(report))
}

pub async fn list_admins(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<Admin>>, AppError> {
    Ok(Json(db::list_admins(&state.pool).await?))
}

#[derive(Debug, Deserialize)]
pub struct NewAdmin {
    pub tg_user_id: i64,
    pub name: Option<String>,
}

pub async fn add_admin(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(body): Json<NewAdmin>,
) -> Result<(StatusCode, Json<Admin>), AppError> {
    if body.tg_user_id <= 0 {
        return Err(AppError::Unprocessable("tg_user_id must be positive".into()));
    }
    let name = non_empty(body.name);
    let added = db::add_admin(&state.pool, body.tg_user_id, name.as_deref()).await?;
    info!(by = admin.id, tg_user_id = added.tg_user_id, "admin added");
    Ok((StatusCode::CREATED, Json(added)))
}

pub async fn remove_admin(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(tg_user_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if tg_user_id == admin.id {
        return Err(AppError::Conflict("admins cannot remove themselves".into()));
    }
    if db::remove_admin(&state.pool, tg_user_id).await? {
        info!(by = admin.id, tg_user_id, "admin removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("admin"))
    }
}

pub async fn list_cities(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<City>>, AppError> {
    Ok(Json(db::list_cities(&state.pool, true).await?))
}

#[derive(Debug, Deserialize)]
pub struct NewCity {
    pub name: String,
    #[serde(default)]
    pub sort_order: i64,
}

pub async fn create_city(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<NewCity>,
) -> Result<(StatusCode, Json<City>), AppError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Unprocessable("city name is required".into()));
    }
    let city = db::create_city(&state.pool, name, body.sort_order).await?;
    Ok((StatusCode::CREATED, Json(city)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CityPatch {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

pub async fn update_city(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(body): Json<CityPatch>,
) -> Result<Json<City>, AppError> {
    let name = body.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(AppError::Unprocessable("city name must not be empty".into()));
    }
    db::update_city(&state.pool, id, name, body.is_active, body.sort_order)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("city"))
}
