use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CreateRoomRequest, CreateRoomResponse, Room, RoomInfo};
use crate::state::AppState;

/// Room provisioning routes
pub fn room_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rooms).post(create_room))
        .route("/{room_id}", get(get_room))
        .route("/{room_id}/close", post(close_room))
}

/// POST /api/v1/rooms - Create a consultation room
async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>> {
    if request.name.is_empty() {
        return Err(AppError::BadRequest("Room name is required".to_string()));
    }
    if request.name.len() > 100 {
        return Err(AppError::BadRequest(
            "Room name must be at most 100 characters".to_string(),
        ));
    }

    let room_id = request
        .room_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let ttl = if request.ttl_seconds > 0 {
        request.ttl_seconds
    } else {
        state.config.room_ttl_seconds
    };

    let room = state.registry.create(Room::new(room_id, request.name, ttl))?;
    Ok(Json(room.into()))
}

/// GET /api/v1/rooms - List active rooms
async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomInfo>> {
    Json(state.registry.list().await)
}

/// GET /api/v1/rooms/{room_id} - Inspect one room
async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomInfo>> {
    state
        .registry
        .info(&room_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::RoomNotFound(format!("room {room_id} does not exist")))
}

/// POST /api/v1/rooms/{room_id}/close - End a consultation
async fn close_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.registry.close(&room_id).await?;
    Ok(Json(serde_json::json!({ "closed": true })))
}
