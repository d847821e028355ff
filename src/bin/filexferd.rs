use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use filexfer::bootstrap::seed_samples;
use filexfer::cli::DaemonOpts;
use filexfer::config::ServerConfig;
use filexfer::server;
use filexfer::store::FileStore;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let config = ServerConfig::from_opts(&opts)?;

    if config.root.exists() && !config.root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", config.root.display());
    }

    let store = FileStore::open(&config.root)
        .with_context(|| format!("Failed to open root directory: {}", config.root.display()))?;
    if config.seed_samples {
        let created = seed_samples(&store).context("Failed to create sample files")?;
        for name in created {
            tracing::info!("created sample file {}", name);
        }
    }

    println!("Starting filexfer daemon:");
    println!("  Root: {}", store.root().display());
    println!("  Bind: {}", config.bind);
    println!("  Max frame: {} bytes", config.max_frame_size);
    if let Some(idle) = config.idle_timeout() {
        println!("  Idle timeout: {}s", idle.as_secs());
    }

    if config.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   The protocol is UNENCRYPTED and UNAUTHENTICATED; only use on trusted networks");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(server::serve(&config))?;
    println!("Server stopped");
    Ok(())
}
