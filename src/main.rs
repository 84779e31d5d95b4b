use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forkdb::api;
use forkdb::branch::BranchManager;
use forkdb::config::Config;
use forkdb::mount::OverlayMounter;
use forkdb::ports::PortAllocator;
use forkdb::storage::{BranchOperations, DatabasePool, LayerOperations};
use forkdb::supervisor::EngineSupervisor;

#[derive(Parser, Debug)]
#[command(name = "forkdb", about = "Copy-on-write branching for MySQL datasets")]
struct Cli {
    /// Listen address override for the HTTP API.
    #[arg(long, env = "FORKDB_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forkdb=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|err| {
        tracing::warn!(%err, "falling back to default configuration");
        Config::default()
    });

    let db = DatabasePool::new(&config.database).await?;
    db.init_schema().await?;

    let manager = Arc::new(BranchManager::new(
        Arc::new(LayerOperations::new(db.pool().clone())),
        Arc::new(BranchOperations::new(db.pool().clone())),
        Arc::new(OverlayMounter::new(config.paths.clone())),
        Arc::new(EngineSupervisor::new(config.engine.clone())),
        PortAllocator::new(config.ports.base),
    ));

    manager.bootstrap().await?;

    let addr = cli.listen.unwrap_or_else(|| config.api.listen_addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "forkdb listening");

    axum::serve(listener, api::router(manager.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    db.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
