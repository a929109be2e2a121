use async_trait::async_trait;
use rusqlite::params;

use crate::feed::model::{PostId, ViewerId};
use crate::feed::ports::{LikeStore, StoreError};
use crate::state::DbPool;

/// Likes keyed by `(post_id, user_id)`. The unique constraint is the only
/// arbiter of duplicates.
pub struct SqliteLikeStore {
    pool: DbPool,
}

impl SqliteLikeStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LikeStore for SqliteLikeStore {
    async fn create_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO likes (id, post_id, user_id) VALUES (?1, ?2, ?3)",
            params![id, post_id.as_str(), user_id.as_str()],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::NotFound(_) => StoreError::NotFound(format!("post {}", post_id)),
            other => other,
        })?;
        tracing::debug!("{} liked {}", user_id, post_id);
        Ok(())
    }

    async fn delete_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id.as_str(), user_id.as_str()],
        )?;
        tracing::debug!("{} unliked {} ({} rows)", user_id, post_id, removed);
        Ok(())
    }

    async fn count_likes(&self, post_id: &PostId) -> Result<u64, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
            params![post_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn has_liked(&self, post_id: &PostId, user_id: &ViewerId) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let liked: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM likes WHERE post_id = ?1 AND user_id = ?2)",
            params![post_id.as_str(), user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(liked)
    }
}
