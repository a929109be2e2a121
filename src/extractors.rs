use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::auth::session::resolve_session;
use crate::error::AppError;
use crate::feed::model::ViewerId;
use crate::state::AppState;

/// The signed-in viewer and the token they presented.
#[derive(Debug, Clone)]
pub struct CurrentViewer {
    pub id: ViewerId,
    pub token: String,
}

/// Extractor that requires a session, from the session cookie or an
/// `Authorization: Bearer` header. Returns 401 otherwise.
impl FromRequestParts<AppState> for CurrentViewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(parts, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthorized)?
            .to_string();

        match resolve_session(&state.db, &token)? {
            Some(id) => Ok(CurrentViewer { id, token }),
            None => Err(AppError::Unauthorized),
        }
    }
}

/// Optional viewer extractor; `None` instead of 401 for anonymous requests.
pub struct MaybeViewer(pub Option<CurrentViewer>);

impl MaybeViewer {
    pub fn id(&self) -> Option<&ViewerId> {
        self.0.as_ref().map(|v| &v.id)
    }
}

impl FromRequestParts<AppState> for MaybeViewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentViewer::from_request_parts(parts, state).await {
            Ok(viewer) => Ok(MaybeViewer(Some(viewer))),
            Err(AppError::Unauthorized) => Ok(MaybeViewer(None)),
            Err(e) => Err(e),
        }
    }
}

fn extract_session_token<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == cookie_name {
                Some(val)
            } else {
                None
            }
        })
}
