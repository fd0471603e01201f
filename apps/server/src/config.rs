use std::env;
use std::str::FromStr;

use anyhow::Context;
use chrono::{Duration, NaiveDateTime, SubsecRound};

use crate::booking::BookingStatus;

/// Rules governing slot offers and the payment countdown.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub payment_deadline: Duration,
    pub lead_time: Duration,
    pub slot_step: Duration,
    /// Terminal status given to bookings whose deposit never arrived.
    pub expired_status: BookingStatus,
    pub auto_complete: bool,
    /// Upper bound on a single outbound notification.
    pub delivery_timeout: std::time::Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            payment_deadline: Duration::minutes(60),
            lead_time: Duration::minutes(30),
            slot_step: Duration::minutes(30),
            expired_status: BookingStatus::Expired,
            auto_complete: false,
            delivery_timeout: std::time::Duration::from_secs(10),
        }
    }
}

impl BookingPolicy {
    /// PENDING bookings created before this UTC instant have missed the
    /// payment deadline.
    pub fn unpaid_before(&self, now_utc: NaiveDateTime) -> NaiveDateTime {
        (now_utc - self.payment_deadline).trunc_subsecs(0)
    }
}

/// Grace periods for tenant accounts that never paid their subscription.
#[derive(Debug, Clone)]
pub struct AccountPolicy {
    pub soft_deadline: Duration,
    pub hard_deadline: Duration,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            soft_deadline: Duration::hours(24),
            hard_deadline: Duration::hours(72),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub bot_token: String,
    pub webapp_url: String,
    pub ops_chat_id: Option<i64>,
    pub payment_webhook_secret: String,
    pub reaper_interval_secs: u64,
    pub booking: BookingPolicy,
    pub accounts: AccountPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the config from any variable source. Unset and blank values
    /// fall back to defaults; malformed or out-of-range values are errors.
    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = &var;
        let bot_token = var("BOT_TOKEN")
            .filter(|v| !v.is_empty())
            .context("BOT_TOKEN must be set")?;

        let expired_status = match var("EXPIRED_STATUS").as_deref() {
            Some("cancelled") => BookingStatus::Cancelled,
            Some("expired") | Some("") | None => BookingStatus::Expired,
            Some(other) => anyhow::bail!("EXPIRED_STATUS must be 'expired' or 'cancelled', got {other:?}"),
        };

        let booking = BookingPolicy {
            payment_deadline: minutes_var(var, "PAYMENT_DEADLINE_MINUTES", 60)?,
            lead_time: minutes_var(var, "LEAD_TIME_MINUTES", 30)?,
            slot_step: minutes_var(var, "SLOT_STEP_MINUTES", 30)?,
            expired_status,
            auto_complete: parse_var(var, "AUTO_COMPLETE", false)?,
            delivery_timeout: std::time::Duration::from_secs(parse_var(var, "NOTIFY_TIMEOUT_SECS", 10)?),
        };
        anyhow::ensure!(
            booking.payment_deadline > Duration::zero(),
            "PAYMENT_DEADLINE_MINUTES must be positive"
        );
        anyhow::ensure!(
            booking.lead_time >= Duration::zero(),
            "LEAD_TIME_MINUTES must not be negative"
        );
        anyhow::ensure!(
            booking.slot_step > Duration::zero(),
            "SLOT_STEP_MINUTES must be positive"
        );
        anyhow::ensure!(
            !booking.delivery_timeout.is_zero(),
            "NOTIFY_TIMEOUT_SECS must be positive"
        );

        let accounts = AccountPolicy {
            soft_deadline: hours_var(var, "ACCOUNT_SOFT_DEADLINE_HOURS", 24)?,
            hard_deadline: hours_var(var, "ACCOUNT_HARD_DEADLINE_HOURS", 72)?,
        };
        anyhow::ensure!(
            accounts.soft_deadline > Duration::zero() && accounts.hard_deadline > Duration::zero(),
            "account deadlines must be positive"
        );

        let reaper_interval_secs: u64 = parse_var(var, "REAPER_INTERVAL_SECS", 300)?;
        anyhow::ensure!(reaper_interval_secs > 0, "REAPER_INTERVAL_SECS must be positive");

        let ops_chat_id = match var("OPS_CHAT_ID") {
            Some(v) if !v.is_empty() => Some(v.parse().context("OPS_CHAT_ID must be a number")?),
            _ => None,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:salon.db?mode=rwc".into()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(var, "PORT", 3000)?,
            bot_token,
            webapp_url: var("WEBAPP_URL").unwrap_or_else(|| "https://example.com".into()),
            ops_chat_id,
            payment_webhook_secret: var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            reaper_interval_secs,
            booking,
            accounts,
        })
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 0,
            bot_token: "123:test".into(),
            webapp_url: "https://example.com".into(),
            ops_chat_id: None,
            payment_webhook_secret: "whsec".into(),
            reaper_interval_secs: 300,
            booking: BookingPolicy::default(),
            accounts: AccountPolicy::default(),
        }
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}

fn minutes_var(var: &impl Fn(&str) -> Option<String>, key: &str, default: i64) -> anyhow::Result<Duration> {
    let minutes = parse_var(var, key, default)?;
    Duration::try_minutes(minutes).with_context(|| format!("{key} is out of range: {minutes}"))
}

fn hours_var(var: &impl Fn(&str) -> Option<String>, key: &str, default: i64) -> anyhow::Result<Duration> {
    let hours = parse_var(var, key, default)?;
    Duration::try_hours(hours).with_context(|| format!("{key} is out of range: {hours}"))
}
