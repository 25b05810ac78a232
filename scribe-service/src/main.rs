use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

mod allow_list;
mod api;
mod config;
mod corpus;
mod db;
mod embeddings;
mod error;
mod fetch;
mod generation;
mod i18n;
mod metrics;
mod ocr;
mod prompt;
mod retrieval;
mod service;
mod web_search;

use crate::config::RuntimeConfig;
use crate::db::Database;
use crate::service::ScribeService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting Scribe service v{}", env!("CARGO_PKG_VERSION"));

    // Static configuration first: it says where the database lives
    let static_config = config::load_static_config()?;
    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        data_dir = %static_config.storage.data_dir.display(),
        "Static configuration loaded"
    );

    std::fs::create_dir_all(&static_config.storage.data_dir)?;

    let db_path = static_config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let runtime_config = Arc::new(RuntimeConfig::load(static_config, &db)?);
    info!("Runtime configuration loaded with DB settings");

    let metrics_handle = match metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let service = Arc::new(ScribeService::new(db, runtime_config.clone()).await?);
    let app = api::router(service, &runtime_config, metrics_handle);

    let addr = format!(
        "{}:{}",
        runtime_config.static_config.server.host, runtime_config.static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scribe_service=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
