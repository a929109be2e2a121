use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentViewer, MaybeViewer};
use crate::feed::deletion;
use crate::feed::model::{
    Bucket, FeedQuery, ImageRef, InvalidValue, Post, PostId, PostPage, SortOrder, UserType, ViewerId,
};
use crate::state::AppState;

const MAX_PAGE_SIZE: u32 = 100;

// --- Requests ---

#[derive(Deserialize, Default)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<String>,
    pub user_type: Option<String>,
    pub author: Option<String>,
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    pub image_ref: ImageRef,
    pub description: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route("/api/posts/{id}", get(get_post).delete(delete_post))
}

impl ListParams {
    fn into_query(self) -> AppResult<FeedQuery> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::BadRequest("page numbers start at 1".into()));
        }
        let bad = |e: InvalidValue| AppError::BadRequest(e.to_string());

        Ok(FeedQuery {
            page,
            sort: self
                .sort
                .as_deref()
                .map(str::parse::<SortOrder>)
                .transpose()
                .map_err(bad)?
                .unwrap_or_default(),
            user_type: self
                .user_type
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(str::parse::<UserType>)
                .transpose()
                .map_err(bad)?,
            author: self.author.filter(|a| !a.is_empty()).map(ViewerId),
        })
    }
}

// --- Handlers ---

async fn list_posts(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Query(params): Query<ListParams>,
) -> AppResult<Json<PostPage>> {
    let page_size = params
        .page_size
        .unwrap_or(state.config.feed.page_size)
        .clamp(1, MAX_PAGE_SIZE);
    let query = params.into_query()?;

    let page = state.posts.list_posts(&query, page_size, viewer.id()).await?;
    Ok(Json(page))
}

async fn get_post(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(id): Path<String>,
) -> AppResult<Json<Post>> {
    state
        .posts
        .get_post(&PostId(id), viewer.id())
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

async fn create_post(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<Response> {
    if req.image_ref.bucket() != Bucket::Posts || !req.image_ref.is_owned_by(&viewer.id) {
        return Err(AppError::Forbidden);
    }
    if !state.images.exists(&req.image_ref).await {
        return Err(AppError::BadRequest("upload the image first".into()));
    }

    let post = state
        .posts
        .create_post(&viewer.id, &req.image_ref, &req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(post)).into_response())
}

async fn delete_post(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let post = state
        .posts
        .get_post(&PostId(id), Some(&viewer.id))
        .await?
        .ok_or(AppError::NotFound)?;

    deletion::delete_post(state.images.as_ref(), state.posts.as_ref(), &post, &viewer.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_default_to_first_newest_page() {
        let query = ListParams::default().into_query().unwrap();
        assert_eq!(query, FeedQuery::default());
    }

    #[test]
    fn list_params_parse_filters() {
        let query = ListParams {
            page: Some(2),
            sort: Some("oldest".into()),
            user_type: Some("bassist".into()),
            author: Some("alice".into()),
            ..ListParams::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(query.page, 2);
        assert_eq!(query.sort, SortOrder::Oldest);
        assert_eq!(query.user_type, Some(UserType::Bassist));
        assert_eq!(query.author, Some(ViewerId::new("alice")));
    }

    #[test]
    fn list_params_reject_bad_values() {
        let zero = ListParams {
            page: Some(0),
            ..ListParams::default()
        };
        assert!(matches!(zero.into_query(), Err(AppError::BadRequest(_))));

        let sort = ListParams {
            sort: Some("popular".into()),
            ..ListParams::default()
        };
        assert!(matches!(sort.into_query(), Err(AppError::BadRequest(_))));
    }
}
