use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentViewer;
use crate::feed::model::{Bucket, ImageRef, InvalidValue};
use crate::feed::ports::ImageStore;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UploadParams {
    pub bucket: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub image_ref: ImageRef,
    pub image_url: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/images", post(upload))
        .route("/media/{*image_ref}", get(serve).delete(remove))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// Multipart upload; the image is the `file` field.
async fn upload(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let bucket: Bucket = params
        .bucket
        .as_deref()
        .unwrap_or("posts")
        .parse()
        .map_err(|e: InvalidValue| AppError::BadRequest(e.to_string()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("file name missing".into()))?;
        let data = field.bytes().await.map_err(multipart_error)?;
        if data.len() > state.images.max_bytes() {
            return Err(AppError::PayloadTooLarge);
        }

        let image_ref = state
            .images
            .put_image(bucket, &viewer.id, &file_name, data)
            .await?;
        let body = UploadResponse {
            image_url: image_ref.public_path(),
            image_ref,
        };
        return Ok((StatusCode::CREATED, Json(body)).into_response());
    }

    Err(AppError::BadRequest("no file field in upload".into()))
}

async fn serve(State(state): State<AppState>, Path(raw): Path<String>) -> AppResult<Response> {
    let image = ImageRef::parse(&raw).map_err(|_| AppError::NotFound)?;
    let (data, mime) = state.images.read_image(&image).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        data,
    )
        .into_response())
}

/// Only the owner segment of the ref may delete it. A post may still point
/// at the image: post deletion removes the image before the record, and
/// remote clients do that in two requests.
async fn remove(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Path(raw): Path<String>,
) -> AppResult<StatusCode> {
    let image = ImageRef::parse(&raw).map_err(|_| AppError::NotFound)?;
    if !image.is_owned_by(&viewer.id) {
        return Err(AppError::Forbidden);
    }

    state.images.remove_image(&image).await?;
    Ok(StatusCode::NO_CONTENT)
}
