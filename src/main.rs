use clap::Parser;
use kubewire::cache::registry::WatcherRegistry;
use kubewire::config::{Args, ServerConfig};
use kubewire::k8s::connection::ConnectionRegistry;
use kubewire::server::Server;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> kubewire::Result<()> {
    let args = Args::parse();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize crypto provider for rustls
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = ServerConfig::load(&args)?;
    info!("⚙️ Configuration:\n{}", config.summary());

    let connections = Arc::new(ConnectionRegistry::load(config.kubeconfig.as_deref())?);
    info!("☸️ Serving contexts: {}", connections.context_names().join(", "));

    let registry = Arc::new(WatcherRegistry::new(connections, config.watcher.clone()));
    let server = Server::new(&config, registry.clone())?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Unable to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down");
        signal.cancel();
    });

    let result = server.run(&config, shutdown).await;
    registry.shutdown();
    result
}
