use axum::http::{header, HeaderMap};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::error::BookingError;
use crate::models::{Salon, TelegramUser};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of initData before it's considered expired (24 hours).
const MAX_AUTH_AGE_SECS: i64 = 86400;

/// Header carrying the hex HMAC of a payment callback body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Validates Telegram Mini App initData and extracts user info.
/// See: https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app
pub fn validate_init_data(init_data: &str, bot_token: &str, now_ts: i64) -> Option<TelegramUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = params.get("hash")?;

    let auth_date: i64 = params.get("auth_date")?.parse().ok()?;
    if now_ts - auth_date > MAX_AUTH_AGE_SECS {
        tracing::warn!(auth_date, age = now_ts - auth_date, "initData expired");
        return None;
    }

    if init_data_hash(&params, bot_token)? != *hash {
        tracing::warn!("initData hash mismatch");
        return None;
    }

    serde_json::from_str::<TelegramUser>(params.get("user")?).ok()
}

/// hex(HMAC-SHA256(HMAC-SHA256("WebAppData", bot_token), data_check_string))
fn init_data_hash(params: &BTreeMap<String, String>, bot_token: &str) -> Option<String> {
    let data_check_string: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut secret_mac = HmacSha256::new_from_slice(b"WebAppData").ok()?;
    secret_mac.update(bot_token.as_bytes());
    let secret_key = secret_mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).ok()?;
    mac.update(data_check_string.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Authenticated Telegram user from an `Authorization: tma <initData>` header.
pub fn user_from_headers(
    headers: &HeaderMap,
    bot_token: &str,
    now_ts: i64,
) -> Result<TelegramUser, BookingError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(BookingError::Unauthorized("missing Authorization header"))?;
    value
        .strip_prefix("tma ")
        .and_then(|init_data| validate_init_data(init_data, bot_token, now_ts))
        .ok_or(BookingError::Unauthorized("invalid Telegram auth"))
}

pub fn is_owner(user: &TelegramUser, salon: &Salon) -> bool {
    user.id == salon.owner_tg_id
}

/// Constant-time check of a hex HMAC-SHA256 signature over `body`.
///
/// An empty secret disables the endpoint: nothing verifies.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
