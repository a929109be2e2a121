// Post removal shared by the feed controller and the HTTP delete route.
// The image goes first; if it cannot be removed the post record stays.
use thiserror::Error;

use crate::feed::model::{Post, ViewerId};
use crate::feed::ports::{ImageStore, PostStore, StoreError};

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("Only the author can delete this post")]
    NotAuthor,

    #[error("Could not remove the post image: {0}")]
    Media(StoreError),

    #[error("Could not remove the post: {0}")]
    Record(StoreError),
}

/// Remove `post`'s image, then its record. A missing image counts as removed.
pub async fn delete_post(
    images: &dyn ImageStore,
    posts: &dyn PostStore,
    post: &Post,
    requester: &ViewerId,
) -> Result<(), DeleteError> {
    if &post.author_id != requester {
        return Err(DeleteError::NotAuthor);
    }

    match images.remove_image(&post.image_ref).await {
        Ok(()) => {}
        Err(StoreError::NotFound(_)) => {
            tracing::debug!("Image {} already gone", post.image_ref);
        }
        Err(e) => {
            tracing::warn!("Keeping post {}: image removal failed: {}", post.id, e);
            return Err(DeleteError::Media(e));
        }
    }

    match posts.delete_post(&post.id, requester).await {
        Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
        Err(e) => Err(DeleteError::Record(e)),
    }
}
