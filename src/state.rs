use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::db::{SqliteLikeStore, SqlitePostStore, SqliteProfileStore};
use crate::feed::ports::{DynLikeStore, DynPostStore, DynProfileStore};
use crate::media::DiskImageStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub posts: DynPostStore,
    pub likes: DynLikeStore,
    pub profiles: DynProfileStore,
    pub images: Arc<DiskImageStore>,
}

impl AppState {
    /// Wire the SQLite and disk stores over an already migrated pool.
    pub fn new(db: DbPool, config: Config) -> Self {
        let images = DiskImageStore::new(config.media_path(), config.max_upload_bytes());
        Self {
            posts: Arc::new(SqlitePostStore::new(db.clone())),
            likes: Arc::new(SqliteLikeStore::new(db.clone())),
            profiles: Arc::new(SqliteProfileStore::new(db.clone())),
            images: Arc::new(images),
            db,
            config,
        }
    }
}
