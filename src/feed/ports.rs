// Collaborator contracts the feed controller depends on. Implemented by the
// SQLite stores and disk image store in-process, and by `client::HttpBackend`
// over the JSON API.
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::model::{
    Bucket, FeedQuery, ImageRef, Post, PostId, PostPage, Profile, UserType, ViewerId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Network or backend hiccup; safe to reconcile and try again later.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Already exists")]
    Duplicate,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Errors worth reconciling against rather than reporting as a denial.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Backend(_))
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Self::Duplicate
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Self::NotFound("referenced row".into())
            }
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("row".into()),
            _ => Self::Backend(e.to_string()),
        }
    }
}

/// Who is looking at the feed. Synchronous so that like toggles can be gated
/// without suspending.
pub trait ViewerContext: Send + Sync {
    fn current_viewer(&self) -> Option<ViewerId>;
}

/// Fixed viewer, for in-process use and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticViewer(pub Option<ViewerId>);

impl ViewerContext for StaticViewer {
    fn current_viewer(&self) -> Option<ViewerId> {
        self.0.clone()
    }
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// One page of posts with like counts and the viewer's like flags joined in.
    async fn list_posts(
        &self,
        query: &FeedQuery,
        page_size: u32,
        viewer: Option<&ViewerId>,
    ) -> Result<PostPage, StoreError>;

    async fn get_post(
        &self,
        post_id: &PostId,
        viewer: Option<&ViewerId>,
    ) -> Result<Option<Post>, StoreError>;

    async fn create_post(
        &self,
        author: &ViewerId,
        image: &ImageRef,
        description: &str,
    ) -> Result<Post, StoreError>;

    /// Removes the post record only. Callers remove the image first.
    async fn delete_post(&self, post_id: &PostId, requester: &ViewerId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LikeStore: Send + Sync {
    /// `Duplicate` when the viewer already likes the post, `NotFound` when the
    /// post is gone.
    async fn create_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError>;

    /// Succeeds whether or not a like existed.
    async fn delete_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError>;

    async fn count_likes(&self, post_id: &PostId) -> Result<u64, StoreError>;

    async fn has_liked(&self, post_id: &PostId, user_id: &ViewerId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put_image(
        &self,
        bucket: Bucket,
        owner: &ViewerId,
        file_name: &str,
        data: Bytes,
    ) -> Result<ImageRef, StoreError>;

    /// `NotFound` when nothing is stored under the ref.
    async fn remove_image(&self, image: &ImageRef) -> Result<(), StoreError>;
}

/// Fields a profile edit may change. `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub user_type: Option<UserType>,
    pub message: Option<String>,
    pub avatar_ref: Option<ImageRef>,
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub username: String,
    pub user_type: UserType,
    pub message: Option<String>,
    pub avatar_ref: Option<ImageRef>,
}

/// Backend-side profile persistence.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn create_profile(&self, id: &ViewerId, profile: NewProfile) -> Result<Profile, StoreError>;

    async fn get_profile(&self, id: &ViewerId) -> Result<Option<Profile>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Profile>, StoreError>;

    async fn update_profile(&self, id: &ViewerId, update: ProfileUpdate) -> Result<Profile, StoreError>;
}

pub type DynViewerContext = Arc<dyn ViewerContext>;
pub type DynPostStore = Arc<dyn PostStore>;
pub type DynLikeStore = Arc<dyn LikeStore>;
pub type DynImageStore = Arc<dyn ImageStore>;
pub type DynProfileStore = Arc<dyn ProfileStore>;
