use super::{AppError, AppState};
use crate::auth::TelegramUser;
use crate::model::Order;
use crate::orders::{self, OrderWithItems, SubmitOrder};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

pub async fn submit(
    State(state): State<AppState>,
    user: TelegramUser,
    Json(req): Json<SubmitOrder>,
) -> Result<(StatusCode, Json<OrderWithItems>), AppError> {
    let order = orders::submit(&state.pool, user.id(), &req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn my_orders(
    State(state): State<AppState>,
    user: TelegramUser,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(orders::list_for_user(&state.pool, user.id()).await?))
}

/// Someone else's order is reported as missing.
pub async fn my_order(
    State(state): State<AppState>,
    user: TelegramUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderWithItems>, AppError> {
    orders::get(&state.pool, id)
        .await?
        .filter(|o| o.order.tg_user_id == user.id())
        .map(Json)
        .ok_or(AppError::NotFound("order"))
}
