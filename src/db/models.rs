// Raw row shapes and the mapping step into domain types. Query code reads
// rows into these structs; nothing outside `db` sees a column name.
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::feed::model::{ImageRef, Post, PostId, Profile, ViewerId};
use crate::feed::ports::StoreError;

/// Columns selected for a post joined with its author and like data. The
/// viewer id is bound as `?1`; anonymous viewers bind an empty string.
pub const POST_COLUMNS: &str = "p.id, p.user_id, pr.username, pr.user_type, p.image_ref,
     p.description, p.created_at,
     (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS like_count,
     EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1) AS viewer_has_liked";

pub const POST_FROM: &str = "FROM posts p JOIN profiles pr ON pr.id = p.user_id";

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub user_type: String,
    pub image_ref: String,
    pub description: Option<String>,
    pub created_at: String,
    pub like_count: i64,
    pub viewer_has_liked: bool,
}

impl PostRow {
    /// Read a row selected with `POST_COLUMNS`.
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            username: row.get(2)?,
            user_type: row.get(3)?,
            image_ref: row.get(4)?,
            description: row.get(5)?,
            created_at: row.get(6)?,
            like_count: row.get(7)?,
            viewer_has_liked: row.get(8)?,
        })
    }

    pub fn into_post(self) -> Result<Post, StoreError> {
        let image_ref = ImageRef::parse(&self.image_ref)
            .map_err(|e| StoreError::Backend(format!("post {}: {}", self.id, e)))?;
        let author_type = self
            .user_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("post {}: {}", self.id, e)))?;

        Ok(Post {
            id: PostId(self.id),
            author_id: ViewerId(self.user_id),
            author_username: self.username,
            author_type,
            image_url: image_ref.public_path(),
            image_ref,
            description: self.description.unwrap_or_default(),
            created_at: parse_timestamp(&self.created_at)?,
            like_count: u64::try_from(self.like_count).unwrap_or(0),
            viewer_has_liked: self.viewer_has_liked,
        })
    }
}

pub const PROFILE_COLUMNS: &str = "id, username, user_type, avatar_ref, message, created_at";

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub user_type: String,
    pub avatar_ref: Option<String>,
    pub message: Option<String>,
    pub created_at: String,
}

impl ProfileRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            user_type: row.get(2)?,
            avatar_ref: row.get(3)?,
            message: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    pub fn into_profile(self) -> Result<Profile, StoreError> {
        let user_type = self
            .user_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("profile {}: {}", self.id, e)))?;
        let avatar_ref = self
            .avatar_ref
            .as_deref()
            .map(ImageRef::parse)
            .transpose()
            .map_err(|e| StoreError::Backend(format!("profile {}: {}", self.id, e)))?;

        Ok(Profile {
            avatar_url: avatar_ref.as_ref().map(ImageRef::public_path),
            avatar_ref,
            id: ViewerId(self.id),
            username: self.username,
            user_type,
            message: self.message,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Timestamp format written to the database. Sorts lexicographically.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 and SQLite's `datetime('now')` format.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .map_err(|_| StoreError::Backend(format!("unparseable timestamp '{}'", raw)))
}
