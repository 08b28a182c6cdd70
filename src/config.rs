use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Holds `uploads_temp/` (chunks) and `downloads/` (final artifacts).
    pub storage_dir: PathBuf,
    /// Holds the JSON tables.
    pub data_dir: PathBuf,
    /// Bearer token required on `/api/*`; `None` leaves the gate open.
    pub admin_token: Option<String>,
    pub max_body_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Content delivery server with chunked uploads and live chat")]
pub struct Args {
    /// Host to bind to (overrides PROSITE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PROSITE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for chunk and download storage (overrides PROSITE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Directory for JSON tables (overrides PROSITE_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Bearer token for admin routes (overrides PROSITE_ADMIN_TOKEN)
    #[arg(long)]
    pub admin_token: Option<String>,

    /// Maximum request body size in bytes (overrides PROSITE_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |key| match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", key)),
        })
    }

    /// Merge CLI args over values returned by `lookup` over defaults.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        // --- Environment fallback ---
        let env_host = lookup("PROSITE_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match lookup("PROSITE_PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing PROSITE_PORT value `{}`", value))?,
            None => 3001,
        };
        let env_storage = lookup("PROSITE_STORAGE_DIR")?.unwrap_or_else(|| "./storage".into());
        let env_data = lookup("PROSITE_DATA_DIR")?.unwrap_or_else(|| "./data".into());
        let env_token = lookup("PROSITE_ADMIN_TOKEN")?.filter(|t| !t.is_empty());
        let env_max_body = match lookup("PROSITE_MAX_BODY_BYTES")? {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing PROSITE_MAX_BODY_BYTES value `{}`", value))?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or_else(|| env_storage.into()),
            data_dir: args.data_dir.unwrap_or_else(|| env_data.into()),
            admin_token: args.admin_token.or(env_token),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_max_body),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.storage_dir.join("uploads_temp")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.storage_dir.join("downloads")
    }
}
