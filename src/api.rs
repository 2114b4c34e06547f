//! 읽기 전용 REST 조회
//!
//! 대시보드나 외부 서비스용. 시그널링과 같은 메모리 상태를 보여 줄 뿐 변경하지 않는다.

use crate::protocol::ParticipantInfo;
use crate::state::{AppState, CallSession};
use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: String,
    pub username: String,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: String,
    pub participants: Vec<ParticipantInfo>,
    pub created_at: DateTime<Utc>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/online-users", get(online_users_handler))
        .route("/api/calls/active", get(active_calls_handler))
        .route("/api/calls/history", get(call_history_handler))
        .route("/api/rooms", get(rooms_handler))
}

async fn online_users_handler(State(state): State<Arc<AppState>>) -> Json<Vec<OnlineUser>> {
    let core = state.core.lock().await;
    let users = core
        .registry
        .presences()
        .map(|p| OnlineUser {
            user_id: p.user_id.clone(),
            username: p.display_name.clone(),
            last_seen_at: p.last_seen_at,
        })
        .collect();
    Json(users)
}

async fn active_calls_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CallSession>> {
    Json(state.core.lock().await.calls.active_sessions())
}

/// 최근 기록부터
async fn call_history_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CallSession>> {
    let core = state.core.lock().await;
    Json(core.calls.history().rev().cloned().collect())
}

async fn rooms_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RoomView>> {
    let core = state.core.lock().await;
    let rooms = core
        .rooms
        .rooms()
        .into_iter()
        .map(|room| RoomView {
            participants: room.participant_infos(),
            room_id: room.room_id,
            created_at: room.created_at,
        })
        .collect();
    Json(rooms)
}
