pub mod api;
pub mod audit;
pub mod authorization;
pub mod blob_store;
pub mod config;
pub mod core_state;
pub mod crypto;
pub mod db;
pub mod disputes;
pub mod error;
pub mod insight;
pub mod models;
pub mod records;
pub mod users;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::api::{start_api_server, ApiContext, ServerError, TokenDirectory};
use crate::api::types::PrincipalsError;
use crate::blob_store::{BlobError, LocalBlobStore};
use crate::config::{AppConfig, ConfigError};
use crate::core_state::CoreState;
use crate::crypto::{CryptoError, FieldCodec};
use crate::db::DatabaseError;

/// Anything that stops the service from coming up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Encryption key error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),
    #[error("Principals error: {0}")]
    Principals(#[from] PrincipalsError),
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the exchange and serve until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig::from_env()?;
    let codec = FieldCodec::from_secret(&config.encryption_secret)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let conn = db::open_database(&config.database_path())?;
    let blobs = Arc::new(LocalBlobStore::open(&config.blob_dir(), &config.public_url)?);
    let insight = insight::from_config(config.insight.as_ref());
    let authenticator = TokenDirectory::load(&config.principals_file)?;

    let core = Arc::new(CoreState::new(conn, codec, blobs, insight));
    let ctx = ApiContext::new(core.clone(), Arc::new(authenticator));

    let server = start_api_server(ctx, config.bind_addr).await?;
    tracing::info!(addr = %server.addr, "Ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for shutdown signal");
    }

    server.stop().await;
    core.audit().flush().await;
    tracing::info!(audit_failures = core.audit().failures(), "Shutdown complete");
    Ok(())
}
