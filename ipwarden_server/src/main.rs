//! ipwarden server binary

use ipwarden_server::{abuse, config, db, redis, routes};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often stale in-process rate limit windows and geo entries are dropped
const LOCAL_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ipwarden_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting ipwarden server on {}:{}", config.host, config.port);
    tracing::info!("Geo provider: {}", config.geo_provider_url);

    // Initialize database
    tracing::info!("Connecting to database...");
    let db_pool = db::init_pool(&config.database_url).await?;
    tracing::info!("Running database migrations...");
    db::run_migrations(&db_pool).await?;

    // Initialize Redis if configured
    let redis_client = match config.redis_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to Redis...");
            Some(redis::init_client(url).await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set, geo cache and rate limiter are in-process");
            None
        }
    };

    let state = routes::AppState::new(config.clone(), db_pool, redis_client)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic anomaly scan
    let scanner_task = if config.scan_interval.is_zero() {
        tracing::info!("Built-in scan scheduler disabled");
        None
    } else {
        tracing::info!(
            interval_secs = config.scan_interval.as_secs(),
            window_secs = config.scan_window.as_secs(),
            "Starting anomaly scanner"
        );
        Some(abuse::spawn_scanner(
            state.scanner.clone(),
            config.scan_interval,
            config.scan_window,
            shutdown_rx.clone(),
        ))
    };

    // Drop stale in-process rate limit windows and expired geo entries
    let local_limiter = state.local_limiter.clone();
    let local_cache = state.local_cache.clone();
    if local_limiter.is_some() || local_cache.is_some() {
        let max_age = config
            .login_rate_authenticated
            .window
            .max(config.login_rate_anonymous.window);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LOCAL_CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Some(limiter) = &local_limiter {
                            limiter.cleanup(max_age);
                        }
                        if let Some(cache) = &local_cache {
                            let purged = cache.purge_expired();
                            if purged > 0 {
                                tracing::debug!(purged, "Purged expired geo cache entries");
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = scanner_task {
        let _ = task.await;
    }

    Ok(())
}
