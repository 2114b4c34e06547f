//! WebRTC 시그널링 핸들러
//!
//! offer/answer/ICE 후보를 대상 사용자의 현재 연결로 그대로 전달한다.
//! 대상이 오프라인이면 버린다. 시그널링 시점이 지난 페이로드는 재전송할 의미가 없다.
//! 원격 SDP 설정 전에 도착한 후보의 버퍼링은 수신 측 피어의 몫이다.

use super::non_empty;
use crate::protocol::ServerMessage;
use crate::state::{AppState, ConnectionHandle};
use serde_json::Value;

/// ICE Candidate 처리 (1:1, 방 공통)
pub async fn handle_ice_candidate(
    state: &AppState,
    connection: &ConnectionHandle,
    to_user_id: &str,
    from_user_id: Option<&str>,
    candidate: Value,
    room_id: Option<String>,
) {
    relay(state, connection, to_user_id, from_user_id, "ICE candidate", |from| {
        ServerMessage::IceCandidate {
            from_user_id: from,
            candidate,
            room_id,
        }
    })
    .await;
}

/// 방 참가자 간 Offer 처리
pub async fn handle_offer(
    state: &AppState,
    connection: &ConnectionHandle,
    room_id: String,
    to_user_id: &str,
    from_user_id: Option<&str>,
    offer: Value,
) {
    relay(state, connection, to_user_id, from_user_id, "offer", |from| {
        ServerMessage::WebrtcOffer {
            room_id,
            from_user_id: from,
            offer,
        }
    })
    .await;
}

/// 방 참가자 간 Answer 처리
pub async fn handle_answer(
    state: &AppState,
    connection: &ConnectionHandle,
    room_id: String,
    to_user_id: &str,
    from_user_id: Option<&str>,
    answer: Value,
) {
    relay(state, connection, to_user_id, from_user_id, "answer", |from| {
        ServerMessage::WebrtcAnswer {
            room_id,
            from_user_id: from,
            answer,
        }
    })
    .await;
}

/// 보낸 사람을 확인한 뒤 대상에게 전달
async fn relay<F>(
    state: &AppState,
    connection: &ConnectionHandle,
    to_user_id: &str,
    from_user_id: Option<&str>,
    kind: &'static str,
    build: F,
) -> bool
where
    F: FnOnce(String) -> ServerMessage,
{
    let Some(target) = non_empty(to_user_id) else {
        tracing::warn!(connection = %connection.id(), kind = kind, "Dropped signal without toUserId");
        return false;
    };

    let core = state.core.lock().await;
    let Some(from) = core.acting_user(connection.id(), from_user_id) else {
        tracing::warn!(connection = %connection.id(), kind = kind, "Dropped signal without sender");
        return false;
    };

    let delivered = core.send_to_user(target, build(from.clone()));
    if delivered {
        tracing::debug!(from = %from, to = %target, kind = kind, "Relayed signal");
    } else {
        tracing::debug!(from = %from, to = %target, kind = kind, "Target offline, signal dropped");
    }
    delivered
}
