use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::session::delete_session;
use crate::error::AppResult;
use crate::extractors::CurrentViewer;
use crate::feed::model::{Profile, ViewerId};
use crate::state::AppState;

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionInfo {
    pub viewer_id: ViewerId,
    /// `None` until the account has been onboarded.
    pub profile: Option<Profile>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/session", get(current).delete(sign_out))
}

async fn current(
    State(state): State<AppState>,
    viewer: CurrentViewer,
) -> AppResult<Json<SessionInfo>> {
    let profile = state.profiles.get_profile(&viewer.id).await?;
    Ok(Json(SessionInfo {
        viewer_id: viewer.id,
        profile,
    }))
}

async fn sign_out(State(state): State<AppState>, viewer: CurrentViewer) -> AppResult<Response> {
    delete_session(&state.db, &viewer.token)?;
    tracing::info!("Signed out {}", viewer.id);

    let cookie = format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        state.config.auth.cookie_name
    );
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response())
}
