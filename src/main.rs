mod broadcast;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod protocol;
mod survey;
mod tasks;
mod voting;

use config::Settings;
use db::{Database, TallyStore};
use handlers::AppState;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database = match Database::connect(&settings.database_url, settings.max_connections).await
    {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    if settings.wipe_on_start {
        warn!("WIPE_ON_START is set, discarding all stored votes");
        if let Err(e) = database.clear().await {
            error!("Failed to wipe stored votes: {}", e);
            return;
        }
    }

    let survey = match survey::spawn(Arc::new(settings.catalog), Arc::new(database.clone())).await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to load survey state: {}", e);
            return;
        }
    };

    let sweeper = survey.clone();
    let every = settings.sweep_interval;
    tokio::spawn(async move {
        tasks::presence_sweeper::sweep_disconnected_task(sweeper, every).await;
    });

    if settings.admin_token.is_none() {
        warn!("ADMIN_TOKEN is not set; reset and QR uploads are disabled");
    }

    let app = handlers::router(AppState {
        survey,
        blobs: Arc::new(database),
        admin_token: settings.admin_token.map(Arc::from),
    });

    let listener = match TcpListener::bind(settings.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", settings.bind_addr, e);
            return;
        }
    };
    info!("Listening on {}", settings.bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
