use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentViewer, MaybeViewer};
use crate::feed::model::{LikeSummary, PostId, ViewerId};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SummaryParams {
    pub user_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts/{id}/like", put(like).delete(unlike))
        .route("/api/posts/{id}/likes", get(summary))
}

/// 409 if already liked, 404 if the post is gone.
async fn like(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.likes.create_like(&PostId(id), &viewer.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlike(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.likes.delete_like(&PostId(id), &viewer.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Count plus the liked flag of `user_id`, or of the caller when omitted.
async fn summary(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(id): Path<String>,
    Query(params): Query<SummaryParams>,
) -> AppResult<Json<LikeSummary>> {
    let post_id = PostId(id);
    if state.posts.get_post(&post_id, None).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let subject = params
        .user_id
        .map(ViewerId)
        .or_else(|| viewer.id().cloned());
    let (count, viewer_has_liked) = match subject {
        Some(user) => futures::try_join!(
            state.likes.count_likes(&post_id),
            state.likes.has_liked(&post_id, &user)
        )?,
        None => (state.likes.count_likes(&post_id).await?, false),
    };

    Ok(Json(LikeSummary {
        count,
        viewer_has_liked,
    }))
}
