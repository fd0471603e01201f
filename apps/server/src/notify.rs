use std::time::Duration;

use async_trait::async_trait;

use crate::models::Booking;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("message rejected: {0}")]
    Delivery(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no answer within {0:?}")]
    TimedOut(Duration),
}

/// Outbound messaging collaborator. Implementations deliver a free-text
/// message to one chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError>;
}

/// Delivers messages through the Telegram Bot API.
pub struct TelegramNotifier {
    bot_token: String,
    http: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { bot_token, http })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML"
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Delivery(format!("{status}: {body}")));
        }
        Ok(())
    }
}

/// Fire a notification and swallow any failure. Booking state never depends
/// on delivery, and a delivery never holds the caller longer than `limit`.
pub async fn dispatch(notifier: &dyn Notifier, chat_id: Option<i64>, text: &str, limit: Duration) {
    let Some(chat_id) = chat_id else {
        tracing::debug!("notification skipped: no recipient");
        return;
    };
    let outcome = match tokio::time::timeout(limit, notifier.send(chat_id, text)).await {
        Ok(sent) => sent,
        Err(_) => Err(NotifyError::TimedOut(limit)),
    };
    if let Err(e) = outcome {
        tracing::warn!(chat_id, "notification delivery failed: {}", e);
    }
}

// ── Message builders ──

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn customer_mention(b: &Booking) -> String {
    match &b.customer_username {
        Some(u) => format!("@{}", escape(u)),
        None => escape(&b.customer_name),
    }
}

fn when(b: &Booking) -> String {
    format!(
        "{} {}–{}",
        b.start_at.format("%Y-%m-%d"),
        b.start_at.format("%H:%M"),
        b.end_at.format("%H:%M")
    )
}

pub fn booking_created(b: &Booking, service_names: &[String]) -> String {
    format!(
        "📋 <b>New booking #{}</b>\n\
         👤 {}\n\
         💅 {}\n\
         📅 {}\n\
         💰 Deposit {} of {}",
        b.id,
        customer_mention(b),
        escape(&service_names.join(", ")),
        when(b),
        b.deposit_amount,
        b.total_price
    )
}

pub fn booking_verified(b: &Booking) -> String {
    format!(
        "✅ Booking #{} confirmed\n👤 {}\n📅 {}",
        b.id,
        customer_mention(b),
        when(b)
    )
}

pub fn booking_cancelled(b: &Booking) -> String {
    format!(
        "❌ Booking #{} cancelled\n👤 {}\n📅 {}",
        b.id,
        customer_mention(b),
        when(b)
    )
}

pub fn booking_expired(b: &Booking) -> String {
    format!(
        "⌛ Booking #{} released: deposit not received in time\n📅 {}",
        b.id,
        when(b)
    )
}

pub fn account_deactivated() -> String {
    "⚠️ Your salon has been disabled because the subscription was not paid. \
     It will be removed permanently unless payment is received."
        .to_string()
}

// ── Test doubles ──
