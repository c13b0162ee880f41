//! Request authentication for the mini-app API.
//!
//! The client forwards `Telegram.WebApp.initData` as
//! `Authorization: tma <initData>` (or in `X-Telegram-Init-Data`); it is
//! verified against the bot token on every request.

pub mod init_data;

use crate::db;
use crate::http::{AppError, AppState};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use chrono::Utc;
use init_data::WebAppUser;
use tracing::debug;

pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// Raw initData from the request headers, if any.
pub fn raw_init_data(headers: &HeaderMap) -> Option<&str> {
    let from_auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, rest) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("tma").then_some(rest.trim())
        });
    from_auth.or_else(|| {
        headers
            .get(INIT_DATA_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    })
}

/// A customer authenticated by verified initData.
#[derive(Debug, Clone)]
pub struct TelegramUser(pub WebAppUser);

impl TelegramUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }
}

impl FromRequestParts<AppState> for TelegramUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = raw_init_data(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("missing Telegram init data".into()))?;
        let tg = &state.config.telegram;
        let data = init_data::verify(raw, &tg.bot_token, tg.init_data_max_age_secs, Utc::now().timestamp())
            .map_err(|err| {
                debug!(%err, "rejected init data");
                AppError::Unauthorized(err.to_string())
            })?;
        Ok(TelegramUser(data.user))
    }
}

/// A [`TelegramUser`] present in the `admins` allowlist.
#[derive(Debug, Clone)]
pub struct AdminUser(pub WebAppUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TelegramUser(user) = TelegramUser::from_request_parts(parts, state).await?;
        if !db::is_admin(&state.pool, user.id).await? {
            return Err(AppError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn init_data_from_either_header() {
        let mut h = HeaderMap::new();
        assert_eq!(raw_init_data(&h), None);

        h.insert(INIT_DATA_HEADER, HeaderValue::from_static(" a=1&hash=ff "));
        assert_eq!(raw_init_data(&h), Some("a=1&hash=ff"));

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("TMA b=2&hash=00"));
        assert_eq!(raw_init_data(&h), Some("b=2&hash=00"));

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(raw_init_data(&h), Some("a=1&hash=ff"));
    }
}
