//! Tracing layer that forwards ERROR events to the operations chat.
//!
//! - at most one alert per `MIN_INTERVAL`
//! - identical messages suppressed for `DEDUP_WINDOW`
//! - delivery is spawned onto the runtime, never blocking the caller

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::notify::Notifier;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Rate limit plus dedup bookkeeping.
struct Throttle {
    last_sent: Option<Instant>,
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    /// Whether an alert with `hash` may go out at `now`. Records it if so.
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, at)| now.duration_since(*at) < DEDUP_WINDOW);

        let is_dup = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.duration_since(last) < MIN_INTERVAL);
        if is_dup || too_soon {
            return false;
        }
        self.last_sent = Some(now);
        self.recent.push((hash, now));
        true
    }
}

pub struct OpsAlertLayer {
    notifier: Arc<dyn Notifier>,
    chat_id: i64,
    throttle: Mutex<Throttle>,
}

impl OpsAlertLayer {
    pub fn new(notifier: Arc<dyn Notifier>, chat_id: i64) -> Self {
        Self {
            notifier,
            chat_id,
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

fn alert_text(message: &str, target: &str, location: &str) -> String {
    let at = chrono::Utc::now().format("%H:%M:%S UTC");
    format!(
        "🚨 <b>Booking server error</b>\n\
         <code>{message}</code>\n\
         📍 {target} ({location})\n\
         🕐 {at}"
    )
}

impl<S: Subscriber> Layer<S> for OpsAlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };
        let admitted = match self.throttle.lock() {
            Ok(mut throttle) => throttle.admit(hash, Instant::now()),
            Err(_) => false,
        };
        if !admitted {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let meta = event.metadata();
        let location = format!(
            "{}:{}",
            meta.file().unwrap_or("?"),
            meta.line().map(|l| l.to_string()).unwrap_or_else(|| "?".into())
        );
        let text = alert_text(&message, meta.target(), &location);
        let notifier = self.notifier.clone();
        let chat_id = self.chat_id;

        runtime.spawn(async move {
            // Failures here must not log at ERROR or they would loop back.
            let _ = notifier.send(chat_id, &text).await;
        });
    }
}

// ── Field visitor ──

/// Collects the `message` field plus any structured fields of an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        if self.message.is_empty() {
            extras
        } else {
            format!("{} ({})", self.message, extras)
        }
    }

    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }
}

// ── Tests ──
