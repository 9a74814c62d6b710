//! Volley - campaign dispatcher entry point

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use volley_api::AppState;
use volley_common::config::Config;
use volley_core::{
    CampaignSupervisor, CredentialCodec, Notifier, NullNotifier, SmtpMailer, TelegramNotifier,
};
use volley_storage::db::DatabasePool;
use volley_storage::store::RecordStore;
use volley_storage::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log filter can come from it.
    let config = Config::load()?;
    init_logging(&config.logging.filter);

    info!("Starting Volley campaign dispatcher...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    let store: Arc<dyn RecordStore> = Arc::new(PgStore::new(db_pool.pool().clone()));

    // The credential key is provisioned externally; refusing to start
    // beats silently minting one and stranding every stored credential.
    let codec = CredentialCodec::new(&config.crypto.credential_key)?;

    let mailer = Arc::new(SmtpMailer::new(config.smtp.clone()));

    let notifier: Arc<dyn Notifier> = if config.telegram.enabled {
        info!("Telegram notifications enabled");
        Arc::new(TelegramNotifier::new(config.telegram.clone()))
    } else {
        Arc::new(NullNotifier)
    };

    // Campaigns left running or paused by a previous process have no
    // runner task any more; force-stop them before accepting control
    // requests.
    let reconciled = store.reconcile_interrupted_campaigns().await?;
    if reconciled > 0 {
        warn!(reconciled, "Force-stopped campaigns orphaned by a previous run");
    }

    let supervisor = CampaignSupervisor::new(
        store.clone(),
        mailer,
        notifier,
        codec,
        config.dispatch.clone(),
    );

    let state = Arc::new(AppState { supervisor, store });
    let app = volley_api::create_router(state);

    let addr = format!("{}:{}", config.api.bind, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Volley shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

fn init_logging(filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
