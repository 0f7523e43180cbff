use anyhow::{Context, Result};
use connector_relay::{ConfigFile, Relay};
use std::env;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "relay.toml".to_string());
    tracing::info!("Loading configuration from: {}", config_path);

    let config = ConfigFile::load(&config_path)?;
    config.validate()?;

    tracing::info!("🚀 Starting connector relay");
    let listener = TcpListener::bind(&config.relay.listen)
        .await
        .context(format!("Failed to bind {}", config.relay.listen))?;

    let relay = Relay::new(config.relay.service);
    tokio::select! {
        result = relay.serve(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Relay shutting down");
            Ok(())
        }
    }
}
