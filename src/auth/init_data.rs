//! Verification of the signed `initData` string Telegram hands to mini-apps.
//!
//! The signature scheme:
//!
//! ```text
//! data_check_string = sorted("key=value" for every field except hash).join("\n")
//! secret_key        = HMAC_SHA256(key = "WebAppData", msg = bot_token)
//! hash              = hex(HMAC_SHA256(key = secret_key, msg = data_check_string))
//! ```
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

#[derive(Debug, Error)]
pub enum InitDataError {
    #[error("initData is empty")]
    Empty,
    #[error("initData has no hash")]
    MissingHash,
    #[error("initData hash is not valid hex")]
    MalformedHash,
    #[error("initData signature mismatch")]
    BadSignature,
    #[error("initData has no valid auth_date")]
    MissingAuthDate,
    #[error("initData expired ({age}s old)")]
    Expired { age: i64 },
    #[error("initData has no user")]
    MissingUser,
    #[error("initData user is not valid JSON: {0}")]
    InvalidUser(#[from] serde_json::Error),
}

/// The Telegram user embedded in `initData`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebAppUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl WebAppUser {
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref().filter(|s| !s.is_empty()) {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

/// Verified `initData` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub user: WebAppUser,
    pub auth_date: i64,
    pub query_id: Option<String>,
    pub start_param: Option<String>,
}

fn secret_key(bot_token: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(WEB_APP_DATA_KEY).expect("HMAC accepts any key length");
    mac.update(bot_token.as_bytes());
    let secret = mac.finalize().into_bytes();
    HmacSha256::new_from_slice(&secret).expect("HMAC accepts any key length")
}

fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Verify `raw` against `bot_token`. `max_age_secs == 0` disables the
/// freshness check; `now` is unix seconds.
pub fn verify(
    raw: &str,
    bot_token: &str,
    max_age_secs: u64,
    now: i64,
) -> Result<InitData, InitDataError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(InitDataError::Empty);
    }

    let mut fields: BTreeMap<String, String> = form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let hash = fields.remove("hash").ok_or(InitDataError::MissingHash)?;
    let provided = hex::decode(hash.trim()).map_err(|_| InitDataError::MalformedHash)?;

    let mut mac = secret_key(bot_token);
    mac.update(data_check_string(&fields).as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| InitDataError::BadSignature)?;

    let auth_date = fields
        .get("auth_date")
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or(InitDataError::MissingAuthDate)?;
    if max_age_secs > 0 {
        let age = now - auth_date;
        if age > max_age_secs as i64 {
            return Err(InitDataError::Expired { age });
        }
    }

    let user_json = fields.get("user").ok_or(InitDataError::MissingUser)?;
    let user: WebAppUser = serde_json::from_str(user_json)?;

    Ok(InitData {
        user,
        auth_date,
        query_id: fields.get("query_id").cloned(),
        start_param: fields.get("start_param").cloned(),
    })
}

/// Produce a signed `initData` string for `fields`. Mirrors what Telegram
/// sends; useful for local tooling and tests.
pub fn sign(fields: &[(&str, &str)], bot_token: &str) -> String {
    let sorted: BTreeMap<String, String> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut mac = secret_key(bot_token);
    mac.update(data_check_string(&sorted).as_bytes());
    let hash = hex::encode(mac.finalize().into_bytes());

    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &sorted {
        ser.append_pair(k, v);
    }
    ser.append_pair("hash", &hash);
    ser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456:TEST-TOKEN";
    const USER: &str = r#"{"id":42,"first_name":"Ann","last_name":"Lee","username":"ann"}"#;

    fn signed(auth_date: &str) -> String {
        sign(
            &[("auth_date", auth_date), ("query_id", "AAH"), ("user", USER)],
            TOKEN,
        )
    }

    #[test]
    fn accepts_valid_signature() {
        let data = verify(&signed("1700000000"), TOKEN, 3600, 1_700_000_100).unwrap();
        assert_eq!(data.user.id, 42);
        assert_eq!(data.user.display_name(), "Ann Lee");
        assert_eq!(data.auth_date, 1_700_000_000);
        assert_eq!(data.query_id.as_deref(), Some("AAH"));
        assert_eq!(data.start_param, None);
    }

    #[test]
    fn field_order_does_not_matter() {
        let raw = signed("1700000000");
        let mut parts: Vec<&str> = raw.split('&').collect();
        parts.reverse();
        let shuffled = parts.join("&");
        assert!(verify(&shuffled, TOKEN, 0, 0).is_ok());
    }

    #[test]
    fn rejects_wrong_token() {
        let err = verify(&signed("1700000000"), "other:TOKEN", 0, 0).unwrap_err();
        assert!(matches!(err, InitDataError::BadSignature));
    }

    #[test]
    fn rejects_tampered_field() {
        let raw = signed("1700000000").replace("AAH", "AAX");
        let err = verify(&raw, TOKEN, 0, 0).unwrap_err();
        assert!(matches!(err, InitDataError::BadSignature));
    }

    #[test]
    fn rejects_missing_or_malformed_hash() {
        let err = verify("auth_date=1&user=%7B%7D", TOKEN, 0, 0).unwrap_err();
        assert!(matches!(err, InitDataError::MissingHash));
        let err = verify("auth_date=1&hash=zz", TOKEN, 0, 0).unwrap_err();
        assert!(matches!(err, InitDataError::MalformedHash));
        assert!(matches!(verify("  ", TOKEN, 0, 0), Err(InitDataError::Empty)));
    }

    #[test]
    fn rejects_expired() {
        let err = verify(&signed("1700000000"), TOKEN, 60, 1_700_000_061).unwrap_err();
        assert!(matches!(err, InitDataError::Expired { age: 61 }));
        // max age of zero turns the check off
        assert!(verify(&signed("1700000000"), TOKEN, 0, 1_900_000_000).is_ok());
    }

    #[test]
    fn requires_user_and_auth_date() {
        let raw = sign(&[("auth_date", "1700000000")], TOKEN);
        assert!(matches!(
            verify(&raw, TOKEN, 0, 0),
            Err(InitDataError::MissingUser)
        ));
        let raw = sign(&[("user", USER)], TOKEN);
        assert!(matches!(
            verify(&raw, TOKEN, 0, 0),
            Err(InitDataError::MissingAuthDate)
        ));
        let raw = sign(&[("auth_date", "1"), ("user", "{not json")], TOKEN);
        assert!(matches!(
            verify(&raw, TOKEN, 0, 0),
            Err(InitDataError::InvalidUser(_))
        ));
    }
}
