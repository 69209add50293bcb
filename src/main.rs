use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wagate::api::metrics::init_metrics;
use wagate::config::Config;
use wagate::db::{DeviceStore, SessionStore, WebhookStore};
use wagate::session::SessionManager;
use wagate::webhook::{
    dispatch_channel, Deliverer, ReqwestSender, TokioSleeper, WebhookDispatcher, WebhookService,
};
use wagate::whatsapp::create_factory;
use wagate::AppState;

#[derive(Parser, Debug)]
#[command(name = "wagate")]
#[command(author, version, about = "Multi-tenant WhatsApp session gateway", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wagate.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the API key required on /sessions and /webhooks
    #[arg(long, env = "WAGATE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    if let Some(api_key) = cli.api_key {
        config.auth.set_key(api_key);
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

    tracing::info!("Starting wagate v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;

    // Initialize database
    let db = wagate::db::init(&config.server.data_dir).await?;
    let metrics_handle = init_metrics()?;

    let sessions = SessionStore::new(db.clone());
    let devices = DeviceStore::new(db.clone());
    let webhook_store = WebhookStore::new(db.clone());
    let webhooks = WebhookService::new(
        webhook_store.clone(),
        sessions.clone(),
        config.webhooks.allow_loopback,
    );

    // Start webhook dispatcher
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (dispatch_tx, dispatch_rx) = dispatch_channel(config.webhooks.queue_capacity);
    let sender = ReqwestSender::new(config.webhooks.timeout())
        .context("Failed to build webhook HTTP client")?;
    let deliverer = Deliverer::new(
        webhook_store,
        Arc::new(sender),
        Arc::new(TokioSleeper),
        &config.webhooks,
        shutdown_rx,
    );
    let dispatcher = WebhookDispatcher::new(deliverer, dispatch_rx, config.webhooks.workers);
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run().await;
    });

    // Session manager and restore
    let factory = create_factory(&config.sessions);
    let manager = Arc::new(SessionManager::new(
        sessions,
        devices,
        webhooks.clone(),
        factory,
        dispatch_tx,
        config.sessions.clone(),
    ));
    if let Err(e) = manager.restore().await {
        tracing::error!(error = %e, "Session restore failed");
    }

    // Create app state
    let state = Arc::new(
        AppState::new(config.clone(), manager.clone(), webhooks).with_metrics(metrics_handle),
    );
    let app = wagate::api::create_router(state.clone());

    // Start API server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        driver = manager.driver_name(),
        "API server listening on http://{}",
        addr
    );
    if config.auth.generated {
        tracing::info!("Generated API key: {}", config.auth.api_key);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The HTTP server has drained; close live clients, then stop retries
    manager.shutdown().await;
    let _ = shutdown_tx.send(true);
    drop(state);
    drop(manager);
    if tokio::time::timeout(std::time::Duration::from_secs(5), dispatcher_handle)
        .await
        .is_err()
    {
        tracing::warn!("Webhook dispatcher did not stop in time");
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
