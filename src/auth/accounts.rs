use rusqlite::{params, OptionalExtension};

use crate::feed::model::ViewerId;
use crate::feed::ports::StoreError;
use crate::state::DbPool;

/// Create an account with a fresh id. Sign-up happens out of band; the
/// operator CLI is the only caller.
pub fn create_account(pool: &DbPool) -> Result<ViewerId, StoreError> {
    let id = ViewerId::generate();
    let conn = pool.get()?;
    conn.execute("INSERT INTO accounts (id) VALUES (?1)", params![id.as_str()])?;
    tracing::info!("Created account {}", id);
    Ok(id)
}

pub fn account_exists(pool: &DbPool, id: &ViewerId) -> Result<bool, StoreError> {
    let conn = pool.get()?;
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
