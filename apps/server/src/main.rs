mod auth;
mod booking;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod notify;
mod reaper;
mod schedule;
mod slots;
mod telegram_layer;

use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use booking::BookingManager;
use config::Config;
use notify::{Notifier, TelegramNotifier};
use reaper::Reaper;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub bookings: BookingManager,
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Config (read before tracing so the alert layer can use it) ──
    let config = Config::from_env()?;
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(
        config.bot_token.clone(),
        config.booking.delivery_timeout,
    )?);

    // ── Tracing: console + optional ops chat alerts ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(chat_id) = config.ops_chat_id {
        registry
            .with(telegram_layer::OpsAlertLayer::new(notifier.clone(), chat_id))
            .init();
    } else {
        registry.init();
    }

    if config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, payment callbacks will be rejected");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    db::run_migrations(&pool).await?;

    // ── Background task: expiration sweep ──
    let sweeper = Arc::new(Reaper::new(
        pool.clone(),
        config.booking.clone(),
        config.accounts.clone(),
        notifier.clone(),
    ));
    tokio::spawn(reaper::run(
        sweeper,
        Duration::from_secs(config.reaper_interval_secs),
    ));

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if config.webapp_url != "https://example.com" {
        let origin: axum::http::HeaderValue = config.webapp_url.parse()?;
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([origin]))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        bookings: BookingManager::new(pool.clone(), config.booking.clone(), notifier),
        db: pool,
        config,
        started_at: Instant::now(),
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("Salon booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
