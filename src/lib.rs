//! PR Reviewer - assigns and maintains pull request reviewers inside teams.
//!
//! The library exposes the review engine, its storage contract with SQLite
//! and in-memory implementations, and the HTTP API that fronts it.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use config::Config;
use error::AppError;
use services::http_api::ApiState;
use services::{ReviewEngine, ReviewerSelector};

/// Run the service until Ctrl-C.
pub async fn run(config: Config) -> Result<(), AppError> {
    config.validate()?;

    let pool = db::initialize_with(&config.database_path, &config.pool_settings()).await?;

    if config.reviewer_seed.is_some() {
        log::warn!("[review] Reviewer selection is seeded; picks are reproducible");
    }
    let selector = ReviewerSelector::from_seed(config.reviewer_seed);
    let engine = Arc::new(ReviewEngine::with_sqlite(pool.clone(), selector));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("[http] Shutdown requested"),
            Err(e) => log::error!("[http] Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let state = ApiState::new(engine, shutdown, config.request_timeout());
    let result = services::http_server::serve(config.socket_addr(), state).await;

    pool.close().await;
    result
}
