use fukubun_common::{
    snowflake::{ProcessId, SnowflakePartOutOfRangeError, WorkerId},
    util::{NonPositiveDurationError, PositiveDuration},
};
use fukubun_db::{client::DbClient, memory::MemoryStore, store::Store};
use serde::Deserialize;
use server::{ServerState, Settings, books::GoogleBooks};
use sqlx::{migrate::MigrateError, postgres::PgPoolOptions};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use time::{Duration, UtcOffset, error::ComponentRange};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid UTC offset: {0}")]
    UtcOffset(#[from] ComponentRange),
    #[error("Invalid session lifetime: {0}")]
    SessionTtl(#[from] NonPositiveDurationError),
    #[error("Invalid snowflake worker or process id: {0}")]
    SnowflakePart(#[from] SnowflakePartOutOfRangeError<u8>),
    #[error("Error building the HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Error connecting to the database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Error applying migrations: {0}")]
    Migrate(#[from] MigrateError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn default_utc_offset_hours() -> i8 {
    9
}

fn default_books_api_url() -> String {
    "https://www.googleapis.com/books/v1".to_owned()
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    /// Without a database everything lives in memory until shutdown.
    database_url: Option<String>,
    #[serde(default = "default_utc_offset_hours")]
    utc_offset_hours: i8,
    session_ttl_hours: Option<i64>,
    #[serde(default = "default_books_api_url")]
    books_api_url: String,
    #[serde(default)]
    worker_id: u8,
    #[serde(default)]
    process_id: u8,
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fukubun_api=debug,\
                fukubun_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

fn settings(env: &Env) -> Result<Settings, InitError> {
    let utc_offset = UtcOffset::from_hms(env.utc_offset_hours, 0, 0)?;
    let session_ttl = env
        .session_ttl_hours
        .map(|hours| PositiveDuration::try_from(Duration::hours(hours)))
        .transpose()?;

    Ok(Settings {
        utc_offset,
        session_ttl,
    })
}

async fn store(env: &Env) -> Result<Arc<dyn Store>, InitError> {
    let worker_id = WorkerId::try_from(env.worker_id)?;
    let process_id = ProcessId::try_from(env.process_id)?;

    let Some(database_url) = &env.database_url else {
        warn!("DATABASE_URL is not set, keeping all data in memory");
        return Ok(Arc::new(MemoryStore::new(worker_id, process_id)));
    };

    let pool = PgPoolOptions::new().connect(database_url).await?;
    let client = DbClient::new(pool, worker_id, process_id);
    client.migrate().await?;
    info!("Database migrations applied");

    Ok(Arc::new(client))
}

async fn shutdown_signal(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => warn!(%err, "Could not listen for Ctrl+C"),
    }
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let books = GoogleBooks::new(
        reqwest::Client::builder()
            .user_agent(concat!("fukubun/", env!("CARGO_PKG_VERSION")))
            .build()?,
        env.books_api_url.clone(),
    );
    let state = ServerState {
        store: store(&env).await?,
        books: Arc::new(books),
        settings: settings(&env)?,
    };

    let tracing_layer = TraceLayer::new_for_http();
    let app = server::routes().layer(tracing_layer).with_state(state);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

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
