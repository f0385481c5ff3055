mod config;
mod constants;
mod multipart;
mod routes;
mod services;
mod storage;

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::{IngestConfig, StorageConfig};
use services::identity::{JwksVerifier, TokenVerifier};
use storage::{DriveBackend, LocalFolderBackend, StorageBackend};

pub struct AppState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub storage: Arc<dyn StorageBackend>,
    /// Folder every uploaded file is created in.
    pub destination_id: String,
    pub max_upload_bytes: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api=info,tower_http=info,info")),
        )
        .init();

    let config = IngestConfig::from_env().context("invalid configuration")?;

    let storage: Arc<dyn StorageBackend> = match &config.storage {
        StorageConfig::Local { root } => {
            tracing::info!(root = %root.display(), "Using local storage");
            Arc::new(LocalFolderBackend::new(root.clone()))
        }
        StorageConfig::Drive {
            service_account_key,
        } => {
            tracing::info!(folder = %config.destination_id, "Using Google Drive storage");
            Arc::new(DriveBackend::connect(service_account_key).await?)
        }
    };

    let state = Arc::new(AppState {
        verifier: Arc::new(JwksVerifier::new(&config.client_id, &config.jwks_url)),
        storage,
        destination_id: config.destination_id.clone(),
        max_upload_bytes: config.max_upload_bytes,
    });

    let app = routes::app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
