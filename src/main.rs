use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse::config::Config;
use pulse::AppState;

#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(author, version, about = "Marketing CRM backend: audience segments and campaigns", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "pulse.toml", env = "PULSE_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.server.data_dir = data_dir;
    }

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Pulse CRM v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;

    // Initialize database
    let db = pulse::db::init(&config.server.data_dir).await?;

    let report = pulse::startup::run_startup_checks(&config, &db).await;
    if !report.all_critical_passed {
        bail!("Startup checks failed: {}", report.summary);
    }

    // Ensure bootstrap admin user exists
    pulse::api::auth::ensure_admin_user(&db, &config.auth).await?;

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), db.clone()));

    // Background tasks
    pulse::api::rate_limit::spawn_cleanup_task(
        state.rate_limiter.clone(),
        config.rate_limit.cleanup_interval,
    );
    pulse::engine::spawn_scheduler_task(
        db.clone(),
        state.dispatcher.clone(),
        config.campaigns.scheduler_interval_seconds,
    );

    // Create API router
    let api_router = pulse::api::create_router(state.clone());

    // Serve the frontend build with SPA fallback when configured
    let app = match &config.server.static_dir {
        Some(static_dir) => {
            let index_file = static_dir.join("index.html");
            let serve_static =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));
            axum::Router::new()
                .merge(api_router)
                .fallback_service(serve_static)
        }
        None => api_router,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let pending = state.dispatcher.pending();
    state.dispatcher.cancel_all();
    tracing::info!(pending, "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
