//! nettable-server binary entry point.
//!
//! Usage:
//! ```bash
//! nettable-server --config nettable.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use nettable_server::config::Config;
use nettable_server::server::TableServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        tracing::info!(path = %config_path.display(), "loading configuration");
        Config::from_file(&config_path)?
    } else {
        tracing::info!(
            path = %config_path.display(),
            "no config file found, using defaults"
        );
        Config::default()
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.server.bind_address,
        "starting nettable-server"
    );

    let server = Arc::new(TableServer::new(config));
    server.run().await?;
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("nettable.toml"))
}
