use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::feed::model::ViewerId;
use crate::feed::ports::StoreError;
use crate::state::DbPool;

/// Create a new session for an account. Returns the session token.
pub fn create_session(pool: &DbPool, account: &ViewerId, hours: u64) -> Result<String, StoreError> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, account_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, account.as_str(), token, format!("+{} hours", hours)],
    )
    .map_err(|e| match StoreError::from(e) {
        StoreError::NotFound(_) => StoreError::NotFound(format!("account {}", account)),
        other => other,
    })?;

    Ok(token)
}

/// Resolve an unexpired session token to the account it belongs to.
pub fn resolve_session(pool: &DbPool, token: &str) -> Result<Option<ViewerId>, StoreError> {
    let conn = pool.get()?;
    let account: Option<String> = conn
        .query_row(
            "SELECT account_id FROM sessions WHERE token = ?1 AND expires_at > datetime('now')",
            params![token],
            |row| row.get(0),
        )
        .optional()?;
    Ok(account.map(ViewerId))
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> Result<(), StoreError> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop sessions past their expiry. Returns how many were removed.
pub fn purge_expired(pool: &DbPool) -> Result<usize, StoreError> {
    let conn = pool.get()?;
    let purged = conn.execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])?;
    Ok(purged)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}
