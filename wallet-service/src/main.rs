use anyhow::{Context, Result};
use poem::{listener::TcpListener as HttpListener, Route, Server};
use poem_openapi::OpenApiService;
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use wallet_service::admin_api::AdminApi;
use wallet_service::backend::HttpBackend;
use wallet_service::config::ConfigFile;
use wallet_service::listener::serve_channel;
use wallet_service::network::{self, system_clock};
use wallet_service::signer::HttpSigner;
use wallet_service::store::MemoryWalletStore;
use wallet_service::whitelist::Whitelist;
use wallet_service::{ServiceDeps, WalletService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    tracing::info!("Loading configuration from: {}", config_path);

    let config = ConfigFile::load(&config_path)?;
    config.validate()?;

    let network = network::by_name(&config.network.name)
        .with_context(|| format!("Unknown network: {}", config.network.name))?;
    tracing::info!("Network: {} (id {})", network.name, network.network_id);

    let store = Arc::new(MemoryWalletStore::load(&config.storage.wallets_path)?);
    let whitelist = Arc::new(Whitelist::open(&config.storage.whitelist_path)?);
    tracing::info!("✅ Whitelist opened with {} site(s)", whitelist.list().len());

    let service = WalletService::new(ServiceDeps {
        network,
        store,
        backend: Arc::new(HttpBackend::new(&config.backend.url)),
        signer: Arc::new(HttpSigner::new(&config.signer.url)),
        whitelist,
        clock: system_clock(),
        price_ticker: config.polling.price_ticker.clone(),
    });

    let revocations = service.connections.watch_revocations();
    let pollers = tokio::spawn(service.pollers.clone().run(
        config.polling.price_interval(),
        config.polling.status_interval(),
    ));

    let channel_addr = format!("{}:{}", config.server.host, config.server.channel_port);
    let channel_listener = TcpListener::bind(&channel_addr)
        .await
        .context(format!("Failed to bind {}", channel_addr))?;
    let channel = tokio::spawn(serve_channel(service.clone(), channel_listener));

    let api_service = OpenApiService::new(
        AdminApi {
            service: service.clone(),
        },
        "Wallet Connector Service",
        env!("CARGO_PKG_VERSION"),
    );
    let ui = api_service.scalar();
    let spec = api_service.spec_endpoint();

    let app = Route::new()
        .nest("/", api_service)
        .nest("/docs", ui)
        .nest("/spec", spec);

    tracing::info!("🚀 Wallet service channel listening on {}", channel_addr);
    tracing::info!(
        "   📖 Admin API: http://{}:{}/docs",
        config.server.host,
        config.server.admin_port
    );

    let result = Server::new(HttpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.admin_port
    )))
    .run_with_graceful_shutdown(app, shutdown_signal(), None)
    .await;

    channel.abort();
    pollers.abort();
    revocations.abort();

    result.context("Admin API server failed")?;
    tracing::info!("Wallet service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
