use std::sync::Arc;

mod app;
mod auth;
mod config;
mod db;
mod error;
mod response;
mod state;
mod storage;
mod uploads;
mod users;

use crate::{config::AppConfig, state::AppState, storage::Storage, users::repo::PgUserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "vidtube=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = Arc::new(AppConfig::from_env()?);

    let db = match db::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = ?e, "database connection failed");
            std::process::exit(1);
        }
    };
    tracing::info!("database connected");

    if let Err(e) = db::migrate(&db).await {
        tracing::warn!(error = ?e, "migration failed; continuing");
    }

    let storage = Arc::new(Storage::new(&config.storage).await?);
    let users = Arc::new(PgUserStore::new(db));
    let state = AppState::from_parts(users, config, storage);

    app::serve(app::build_app(state)).await
}
