pub mod likes;
pub mod media;
pub mod posts;
pub mod profiles;
pub mod session;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

// Multipart framing on top of the largest accepted image.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.images.max_bytes().saturating_add(UPLOAD_OVERHEAD);

    Router::new()
        .merge(posts::router())
        .merge(likes::router())
        .merge(profiles::router())
        .merge(media::router())
        .merge(session::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}
