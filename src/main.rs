use std::sync::Arc;
use std::time::Duration;

use chatrelay::app::{self, AssetSource, DirectoryAssets, NoAssets};
use chatrelay::config::Config;
use chatrelay::llm::Invoker;
use chatrelay::server::Server;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        error!(error = %e, "chatrelay stopped");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let invoker = Invoker::from_config(&config, http)?;

    let assets: Arc<dyn AssetSource> = match &config.server.assets_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "serving static assets");
            Arc::new(DirectoryAssets::new(dir))
        }
        None => {
            warn!("no asset directory configured; non-API paths will 404");
            Arc::new(NoAssets)
        }
    };

    let service = app::router(Arc::new(invoker), assets).into_service();
    let server = Server::bind(&config.server.bind).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
        }
        trigger.cancel();
    });

    server.serve(service, shutdown).await?;
    Ok(())
}
