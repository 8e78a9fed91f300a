mod agent;
mod bus;
mod config;
mod core;
mod cron;
mod directions;
mod embeddings;
mod error;
mod jobs;
mod llm;
mod memory;
mod notify;
mod scheduler;
mod server;
mod skills;
mod store;
mod threads;
mod title;
mod tools;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("MINDER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));
    let config = config::AppConfig::load(&config_path).map_err(|e| {
        anyhow::anyhow!("failed to load config from {}: {}", config_path.display(), e)
    })?;

    // RUST_LOG wins; the config's log level is the fallback.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crate::core::run(config))
}
