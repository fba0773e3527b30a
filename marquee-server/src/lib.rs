use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::routing::get;
use log::{error, info};
use marquee_collab::{spawn_relay, Collab, PgBroadcaster, PgDatabase};
use marquee_core::{Broadcaster, Coordinator};
use marquee_impls::{FfmpegBot, HttpTransport};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

mod auth;
mod config;
mod context;
mod docs;
mod errors;
mod gateway;
mod logging;
mod media;
mod rooms;
mod scheduler;
mod schemas;
mod serialized;

pub use config::*;
pub use context::*;
pub use logging::{init_logger, level_from_env};

pub type Router = axum::Router<ServerContext>;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Database is unavailable: {0}")]
    Database(#[from] marquee_collab::DatabaseError),
    #[error("Could not listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Starts the marquee server, returning once it was shut down
pub async fn run_server(config: ServerConfig) -> Result<(), StartupError> {
    let database = Arc::new(PgDatabase::new(&config.database_url).await?);
    database.migrate().await?;

    let store = database.clone();
    let transport = Arc::new(HttpTransport::new(config.transport.clone()));
    let bot = Arc::new(FfmpegBot::new(config.bot.clone()));

    let coordinator = if config.distributed_events {
        let pool = database.pool().clone();

        let coordinator =
            Coordinator::with_broadcaster(config.coordinator, store, transport, bot, |_| {
                Arc::new(PgBroadcaster::new(pool.clone())) as Arc<dyn Broadcaster>
            });

        spawn_relay(pool, coordinator.registry().clone());
        coordinator
    } else {
        Coordinator::new(config.coordinator, store, transport, bot)
    };

    let collab = Arc::new(Collab::new(coordinator, database));
    collab.coordinator.run();

    let context = ServerContext {
        collab: collab.clone(),
    };

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, config.port).into();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Listen { addr, source })?;

    info!("Listening on {}", addr);

    axum::serve(listener, router(context))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    collab.coordinator.shutdown().await;

    Ok(())
}

fn router(context: ServerContext) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/auth", auth::router())
        .nest("/rooms", rooms::router().merge(gateway::router()))
        .nest("/invitations", rooms::invitations_router())
        .nest("/media", media::router())
        .nest("/scheduler", scheduler::router());

    Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for the shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
