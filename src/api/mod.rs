pub mod health;
pub mod rooms;

use axum::Router;

use crate::state::AppState;

/// Assemble the REST surface: room provisioning under a versioned
/// prefix, plus the unversioned health endpoint.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/rooms", rooms::room_routes())
        .merge(health::health_routes())
        .with_state(state)
}
