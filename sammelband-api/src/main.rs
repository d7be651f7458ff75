use sammelband_api::{
    server::{self, ServerState},
    service::FeedService,
};
use sammelband_common::{
    model::{
        ModelValidationError,
        post::CreatePost,
        session::SessionTokenHashError,
        user::{CreateUser, UserHandle},
    },
    snowflake::{ProcessId, WorkerId},
};
use sammelband_db::{DbClient, DbError, MemoryStore};
use serde::Deserialize;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error setting up the database: {0}")]
    Database(#[from] DbError),
    #[error("Error creating demo data: {0}")]
    DemoData(#[from] ModelValidationError),
    #[error("Error creating demo session: {0}")]
    DemoSession(#[from] SessionTokenHashError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default)]
    worker_id: WorkerId,
    #[serde(default)]
    process_id: ProcessId,
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sammelband_api=debug,\
                sammelband_common=debug,\
                sammelband_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .env file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn database_state(env: &Env, database_url: &str) -> Result<ServerState, InitError> {
    let db = Arc::new(
        DbClient::connect(
            database_url,
            env.database_max_connections,
            env.worker_id,
            env.process_id,
        )
        .await?,
    );
    db.migrate().await?;

    Ok(ServerState {
        feed_service: Arc::new(FeedService::new(db.clone(), db.clone())),
        session_store: db,
    })
}

/// Without a database everything lives in memory, seeded with a demo user and post
/// so the API can be tried out right away.
async fn memory_state(env: &Env) -> Result<ServerState, InitError> {
    warn!("DATABASE_URL is not set, data is kept in memory and lost on shutdown");

    let store = Arc::new(MemoryStore::new(env.worker_id, env.process_id));

    let handle = UserHandle::new("demo".to_owned()).map_err(ModelValidationError::from)?;
    let user = store.create_user(&CreateUser { handle }).await?;
    let post = store
        .create_post(&CreatePost {
            author_id: user.id,
            content: "Hello from the demo user".to_owned(),
        })
        .await?;
    let token = store.create_session(user.id, None).await?;

    info!(user_id = %user.id, post_id = %post.id, "Seeded demo data");
    // Bearer credential of the demo user. Shown with RUST_LOG=sammelband_api=trace.
    trace!(%token, "Demo session token");

    Ok(ServerState {
        feed_service: Arc::new(FeedService::new(store.clone(), store.clone())),
        session_store: store,
    })
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl-C, shutting down");
            shutdown.cancel();
        }
        Err(err) => error!(%err, "Could not listen for Ctrl-C"),
    }
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let state = match &env.database_url {
        Some(database_url) => database_state(&env, database_url).await?,
        None => memory_state(&env).await?,
    };
    let app = server::app(state);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
