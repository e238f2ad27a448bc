//! Room inspection routes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;

use crate::services::room::RoomSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub code: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedRoom {
    pub code: String,
    pub topic: String,
}

/// `GET /api/rooms`: list live rooms.
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    let rooms = state
        .rooms
        .list()
        .await
        .into_iter()
        .map(|room| RoomSummary { code: room.code, participants: room.participants })
        .collect();
    Json(rooms)
}

/// `POST /api/rooms`: create a hostless room with a fresh code.
pub async fn create_room(State(state): State<AppState>) -> (StatusCode, Json<CreatedRoom>) {
    let room = state.rooms.create().await;
    let code = room.code().to_owned();
    let topic = frames::topic_for(&code);
    (StatusCode::CREATED, Json(CreatedRoom { code, topic }))
}

/// `GET /api/rooms/:code`: roster, lock, and timeline depth.
pub async fn get_room(State(state): State<AppState>, Path(code): Path<String>) -> Result<Json<RoomSnapshot>, StatusCode> {
    let room = state.rooms.get(&code).await.ok_or(StatusCode::NOT_FOUND)?;
    let snapshot = room.snapshot().await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(snapshot))
}

/// `GET /api/rooms/:code/history`: history as wire lines, oldest first.
pub async fn get_history(State(state): State<AppState>, Path(code): Path<String>) -> Result<Json<Vec<String>>, StatusCode> {
    let room = state.rooms.get(&code).await.ok_or(StatusCode::NOT_FOUND)?;
    let history = room.history().await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(history.iter().map(actions::encode).collect()))
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
