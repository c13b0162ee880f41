use super::{AppError, AppState};
use crate::cart::{self, Quote, QuoteRequest};
use crate::catalog::{self, CatalogQuery, ProductView};
use crate::db;
use crate::model::City;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct CityQuery {
    pub city_id: Option<i64>,
}

pub async fn cities(State(state): State<AppState>) -> Result<Json<Vec<City>>, AppError> {
    Ok(Json(db::list_cities(&state.pool, false).await?))
}

pub async fn categories(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(db::list_categories(&state.pool).await?))
}

pub async fn products(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Vec<ProductView>>, AppError> {
    let views = catalog::list_products(&state.pool, &state.config.app.public_url, &query).await?;
    Ok(Json(views))
}

pub async fn product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CityQuery>,
) -> Result<Json<ProductView>, AppError> {
    catalog::get_product(&state.pool, &state.config.app.public_url, &id, query.city_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("product"))
}

pub async fn quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<Quote>, AppError> {
    db::get_city(&state.pool, req.city_id)
        .await?
        .filter(|c| c.is_active)
        .ok_or(AppError::NotFound("city"))?;
    Ok(Json(cart::quote(&state.pool, req.city_id, &req.items).await?))
}
