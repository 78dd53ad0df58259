pub mod app_state;
pub mod backend;
pub mod clock;
pub mod commands;
pub mod config;
pub mod current_error;
pub mod error;
pub mod guard;
pub mod identity;
pub mod jobs;
pub mod models;
pub mod order_queue;
pub mod poller;
pub mod reconcile;
pub mod runtime;
pub mod store;
#[cfg(test)]
mod test_support;

use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

pub use app_state::EngineState;
pub use backend::Backend;
pub use config::EngineConfig;
pub use error::EngineError;
pub use models::{AppMode, DashboardSnapshot, LocalSettings, PostSwitchStrategy};
pub use reconcile::DashboardModel;
pub use runtime::Runtime;

const DEFAULT_LOG_FILTER: &str = "codex_switch_runtime=info";

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codex-switch")
}

pub async fn run(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    init_tracing();
    let base_dir = data_dir();
    let config = EngineConfig::load(&base_dir.join("engine.json"))?;
    let store = store::AppStore::new(base_dir);
    let runtime = Runtime::start(backend, store, config).await?;
    tracing::info!(db = %runtime.state().store.db_path.display(), "runtime ready");

    tokio::signal::ctrl_c().await?;
    runtime.shutdown().await;
    Ok(())
}
