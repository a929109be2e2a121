// Library exports for pedalboard
// The binary, integration tests and remote clients all go through these modules.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod feed;
pub mod media;
pub mod routes;
pub mod state;

use crate::config::Config;
use crate::state::AppState;

/// Create the data directories, open and migrate the database, and wire the
/// stores together.
pub fn bootstrap(config: &Config) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(config.media_path())?;

    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    Ok(AppState::new(pool, config.clone()))
}
