//! The `stratus` server binary
//!
//! Loads configuration from `STRATUS_*` environment variables, serves
//! until a shutdown signal drains the runtime, and exits 0 on a clean
//! stop or non-zero when binding fails.

use anyhow::Context as _;
use stratus::{Server, ServerConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(threads) = config.worker_threads {
        runtime.worker_threads(threads);
    }
    let runtime = runtime.build().context("runtime startup failed")?;

    runtime.block_on(async {
        let server = Server::new(config)?;
        server.run().await?;
        Ok::<_, stratus::ServerError>(())
    })?;
    Ok(())
}
