use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::profiles::validate_username;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentViewer;
use crate::feed::model::{Bucket, ImageRef, Profile, UserType, ViewerId};
use crate::feed::ports::{ImageStore, NewProfile, ProfileUpdate, StoreError};
use crate::state::AppState;

// --- Requests ---

#[derive(Deserialize)]
pub struct OnboardingRequest {
    pub username: String,
    pub user_type: UserType,
    pub message: Option<String>,
    pub avatar_ref: Option<ImageRef>,
}

#[derive(Deserialize, Default)]
pub struct EditProfileRequest {
    pub username: Option<String>,
    pub user_type: Option<UserType>,
    pub message: Option<String>,
    pub avatar_ref: Option<ImageRef>,
}

#[derive(Deserialize)]
pub struct AvailabilityParams {
    pub username: String,
}

#[derive(Serialize)]
pub struct Availability {
    pub available: bool,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/onboarding", post(onboard))
        .route("/api/profile", get(own_profile).put(edit_profile))
        .route("/api/profiles/availability", get(availability))
        .route("/api/profiles/{id}", get(view_profile))
}

fn check_avatar(avatar: Option<&ImageRef>, owner: &ViewerId) -> AppResult<()> {
    match avatar {
        Some(r) if r.bucket() != Bucket::Avatars || !r.is_owned_by(owner) => {
            Err(AppError::Forbidden)
        }
        _ => Ok(()),
    }
}

// --- Handlers ---

async fn onboard(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Json(req): Json<OnboardingRequest>,
) -> AppResult<Response> {
    check_avatar(req.avatar_ref.as_ref(), &viewer.id)?;

    let profile = state
        .profiles
        .create_profile(
            &viewer.id,
            NewProfile {
                username: req.username.trim().to_string(),
                user_type: req.user_type,
                message: req.message,
                avatar_ref: req.avatar_ref,
            },
        )
        .await
        .map_err(|e| match e {
            StoreError::Duplicate => AppError::Conflict("profile or username already exists".into()),
            other => other.into(),
        })?;

    Ok((StatusCode::CREATED, Json(profile)).into_response())
}

async fn own_profile(
    State(state): State<AppState>,
    viewer: CurrentViewer,
) -> AppResult<Json<Profile>> {
    state
        .profiles
        .get_profile(&viewer.id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// Edit the caller's profile. A replaced avatar is removed once the new
/// one is saved.
async fn edit_profile(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Json(req): Json<EditProfileRequest>,
) -> AppResult<Json<Profile>> {
    check_avatar(req.avatar_ref.as_ref(), &viewer.id)?;

    let before = state
        .profiles
        .get_profile(&viewer.id)
        .await?
        .ok_or(AppError::NotFound)?;

    let updated = state
        .profiles
        .update_profile(
            &viewer.id,
            ProfileUpdate {
                username: req.username.map(|u| u.trim().to_string()),
                user_type: req.user_type,
                message: req.message,
                avatar_ref: req.avatar_ref,
            },
        )
        .await
        .map_err(|e| match e {
            StoreError::Duplicate => AppError::Conflict("username is taken".into()),
            other => other.into(),
        })?;

    if let Some(old) = before.avatar_ref {
        if updated.avatar_ref.as_ref() != Some(&old) {
            match state.images.remove_image(&old).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => tracing::warn!("Could not remove old avatar {}: {}", old, e),
            }
        }
    }

    Ok(Json(updated))
}

async fn view_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Profile>> {
    state
        .profiles
        .get_profile(&ViewerId(id))
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

async fn availability(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityParams>,
) -> AppResult<Json<Availability>> {
    let username = params.username.trim();
    validate_username(username)?;
    let taken = state.profiles.find_by_username(username).await?.is_some();
    Ok(Json(Availability { available: !taken }))
}
