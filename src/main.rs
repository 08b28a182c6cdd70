use anyhow::Result;
use prosite::{AppConfig, AppState, routes};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting prosite on {} (storage {}, data {}, admin gate {})",
        cfg.addr(),
        cfg.storage_dir.display(),
        cfg.data_dir.display(),
        if cfg.admin_token.is_some() { "on" } else { "off" }
    );

    // --- Open stores, services and directories ---
    let state = AppState::from_config(&cfg).await?;
    tracing::info!(
        "Chunks in {}, downloads in {}",
        state.uploads.temp_dir().display(),
        state.uploads.downloads_dir().display()
    );

    // --- Build router ---
    let app = routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
