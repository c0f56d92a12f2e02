use std::sync::Arc;

use anyhow::Context;
use roomcast::{
    app,
    config::Config,
    connections::ConnectionRegistry,
    db,
    ids::IdGenerator,
    message_log::SqliteLog,
    rooms::RoomDirectory,
    store::SqliteStore,
    AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomcast=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url, 16)
        .await
        .with_context(|| format!("could not open database {}", config.database_url))?;

    let directory = RoomDirectory::new(
        Arc::new(IdGenerator::new(config.node_id)),
        Arc::new(SqliteLog::new(db_pool.clone())),
        Arc::new(SqliteStore::new(db_pool)),
        ConnectionRegistry::new(),
        config.room_settings(),
    );
    directory.bootstrap().await.context("could not start rooms")?;
    let sweeper = directory.spawn_invite_sweeper(config.invite_sweep_interval);

    let app = app(AppState { directory: directory.clone() }, config.session_inactivity);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("could not bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, node_id = config.node_id, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("shutting down");
    directory.shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "invite sweeper task failed");
    }
    Ok(())
}
