use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use migration::{Migrator, MigratorTrait};
use miette::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use mission_control_authz::authz::{web, Engine};
use mission_control_authz::errors::ServiceError;
use mission_control_authz::settings::Settings;
use mission_control_authz::storage::DbAdapter;

#[derive(Parser, Debug)]
#[command(
    name = "mission-control-authz",
    version,
    about = "Mission Control authorization core"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;

    // logging: RUST_LOG wins over log.level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.level));
    fmt().with_env_filter(env_filter).init();
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database)
    let adapter = DbAdapter::connect(&settings.database.url)
        .await
        .map_err(ServiceError::from)?;
    Migrator::up(adapter.connection(), None)
        .await
        .map_err(ServiceError::from)?;

    let ctx = CancellationToken::new();
    let engine = Engine::init(
        &ctx,
        settings.engine_config(),
        Arc::new(adapter),
        settings.bootstrap.admin.as_deref(),
    )
    .await
    .map_err(ServiceError::from)?;

    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|_| ServiceError::ListenAddr(settings.listen_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(ServiceError::from)?;
    tracing::info!(%addr, "Authorization API listening");

    axum::serve(listener, web::router(engine.clone()))
        .with_graceful_shutdown(shutdown_signal(ctx.clone()))
        .await
        .map_err(ServiceError::from)?;

    engine.shutdown().await.map_err(ServiceError::from)?;
    Ok(())
}

async fn shutdown_signal(ctx: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
    ctx.cancel();
}
