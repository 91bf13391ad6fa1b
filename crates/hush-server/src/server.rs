use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, routing::post, Router};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    handlers::{create_password, create_secret, health, reveal_secret},
    lifecycle::{LifecycleManager, DEFAULT_STORE_TIMEOUT},
    store::{MemoryStore, RedbStore, SecretStore},
    AppState,
};

/// Where secrets live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// `hush.db` in the data directory.
    Redb,
    /// Process memory; everything is lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" | "disk" => Ok(Self::Redb),
            "memory" | "mem" => Ok(Self::Memory),
            other => anyhow::bail!("unknown storage backend: {other} (expected redb or memory)"),
        }
    }
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub storage: StorageBackend,
    /// Deadline for each individual storage call.
    pub store_timeout: Duration,
    /// How often the store drops expired records.
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
}

impl ServerConfig {
    /// Read the `HUSH_*` environment. An unrecognised `HUSH_STORAGE` is an
    /// error rather than a silent switch to another backend.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("HUSH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("HUSH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("HUSH_DATA_DIR").ok().map(PathBuf::from),
            storage: storage_backend(std::env::var("HUSH_STORAGE").ok().as_deref())?,
            store_timeout: std::env::var("HUSH_STORE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_STORE_TIMEOUT),
            sweep_interval: std::env::var("HUSH_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60)),
            cors_origins: std::env::var("HUSH_CORS_ORIGINS").ok(),
        })
    }
}

fn storage_backend(value: Option<&str>) -> Result<StorageBackend> {
    match value {
        None => Ok(StorageBackend::Redb),
        Some(v) => v.parse::<StorageBackend>().context("invalid HUSH_STORAGE"),
    }
}

/// Resolve (and create) the directory holding `hush.db`: the configured
/// path if any (`HUSH_DATA_DIR` lands there via `from_env`), else the
/// platform data dir (`~/.local/share/hush/` and friends).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "hush")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir: {}", dir.display()))?;
    Ok(dir)
}

/// Open the configured store and start its expiry sweep, so this must run
/// inside a Tokio runtime.
pub fn open_store(cfg: &ServerConfig) -> Result<Arc<dyn SecretStore>> {
    match cfg.storage {
        StorageBackend::Memory => {
            info!("using in-memory storage; secrets will not survive a restart");
            let store = MemoryStore::new();
            store.clone().spawn_sweep(cfg.sweep_interval);
            Ok(Arc::new(store))
        }
        StorageBackend::Redb => {
            let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
            info!(data_dir = %data_dir.display(), "using data directory");
            let store = RedbStore::open(&data_dir.join("hush.db")).context("open store")?;
            store.clone().spawn_sweep(cfg.sweep_interval);
            Ok(Arc::new(store))
        }
    }
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/secrets", post(create_secret))
        .route("/passwords", post(create_password))
        .route("/secrets/{key}/reveal", post(reveal_secret))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = open_store(&cfg)?;
    let manager = LifecycleManager::new(store).with_store_timeout(cfg.store_timeout);
    let state = AppState { manager };

    let app = router(state, build_cors(cfg.cors_origins.as_deref()));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "hush server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
