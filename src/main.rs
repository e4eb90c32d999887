//! CardFlow server entry point.
//!
//! # Startup Flow
//!
//! 1. Load and validate configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Build services, notification dispatcher and rate limiter
//! 4. Start the expiry jobs and the limiter eviction task
//! 5. Serve HTTP until Ctrl-C, then stop background jobs

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cardflow::{
    AppState, config, db,
    middleware::rate_limit::RateLimiter,
    services::{
        card_crypto::CardVault,
        card_service::CardService,
        expiry_sweep::{ExpiryJob, ExpirySweeper, parse_schedule},
        notification::{HttpNotifier, LogNotifier, NotificationDispatcher, Notifier, RetryPolicy},
        transaction_engine::TransactionEngine,
    },
    store::postgres::PgStore,
};

/// How often finished rate-limit windows are dropped.
const LIMITER_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    config.validate().map_err(anyhow::Error::msg)?;
    tracing::info!("Configuration loaded");

    let notice_schedule = parse_schedule(&config.expiry_notice_schedule)
        .context("invalid EXPIRY_NOTICE_SCHEDULE")?;
    let sweep_schedule = parse_schedule(&config.expiry_sweep_schedule)
        .context("invalid EXPIRY_SWEEP_SCHEDULE")?;

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = PgStore::new(pool);
    let vault = CardVault::from_base64_key(&config.card_encryption_key)
        .context("invalid CARD_ENCRYPTION_KEY")?;

    let notifier: Arc<dyn Notifier> = match (&config.notification_url, &config.notification_secret)
    {
        (Some(url), Some(secret)) => {
            tracing::info!(url = %url, "Notifications go to the mail relay");
            Arc::new(HttpNotifier::new(url, secret)?)
        }
        _ => {
            tracing::warn!("NOTIFICATION_URL not set; notifications are only logged");
            Arc::new(LogNotifier)
        }
    };
    let dispatcher = NotificationDispatcher::new(
        notifier,
        RetryPolicy {
            attempts: config.notification_attempts,
            delay: Duration::from_secs(config.notification_retry_delay_secs),
        },
    );

    let limiter = Arc::new(RateLimiter::new(
        config.auth_max_failures,
        Duration::from_secs(config.auth_failure_window_secs),
    ));

    let state = AppState {
        engine: TransactionEngine::new(store.clone(), dispatcher.clone()),
        cards: CardService::new(store.clone(), vault, dispatcher.clone(), &config.card_iin)
            .with_max_top_up(config.max_top_up_cents),
        limiter: Arc::clone(&limiter),
        webhook_secret: Arc::from(config.network_webhook_secret.as_str()),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        trusted_proxy_depth: config.trusted_proxy_depth,
        store: store.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = ExpirySweeper::new(store, dispatcher);
    let jobs = [
        sweeper.spawn(ExpiryJob::Notice, notice_schedule, shutdown_rx.clone()),
        sweeper.spawn(ExpiryJob::Sweep, sweep_schedule, shutdown_rx.clone()),
        spawn_limiter_eviction(limiter, shutdown_rx),
    ];

    let app = cardflow::router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped, waiting for background jobs");
    let _ = shutdown_tx.send(true);
    for job in jobs {
        if let Err(e) = job.await {
            tracing::error!(error = %e, "Background job panicked");
        }
    }

    Ok(())
}

fn spawn_limiter_eviction(
    limiter: Arc<RateLimiter>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_EVICTION_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = limiter.evict_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, "Dropped finished rate-limit windows");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
