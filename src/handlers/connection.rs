//! 연결 핸들러

use super::{presence, room};
use crate::protocol::{ServerMessage, UserRef};
use crate::state::{
    AppState, CallOutcome, ClientSender, ConnectionHandle, ConnectionId, PeerSession,
    Registration, SignalingCore,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// 새 연결 처리
pub async fn handle_connection(state: &AppState, sender: ClientSender) -> ConnectionHandle {
    let handle = ConnectionHandle::new(sender);

    state.peers.insert(
        handle.id(),
        PeerSession {
            handle: handle.clone(),
            connected_at: Instant::now(),
        },
    );

    handle.send(ServerMessage::Connected {
        connection_id: handle.id().to_string(),
    });

    tracing::info!(connection = %handle.id(), "New connection established");
    handle
}

/// 연결 해제 처리
pub async fn handle_disconnect(state: &AppState, connection: ConnectionId) {
    let uptime = state
        .peers
        .remove(&connection)
        .map(|(_, session)| session.connected_at.elapsed().as_secs());

    let mut guard = state.core.lock().await;
    reconcile(state, &mut guard, connection);
    drop(guard);

    tracing::info!(connection = %connection, uptime_secs = ?uptime, "Connection closed");
}

/// 수신 루프를 별도 태스크로 실행하고, 루프가 어떻게 끝나든(패닉 포함) 연결 해제를 처리한다
pub async fn supervise_connection<F>(state: Arc<AppState>, connection: ConnectionId, session: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = tokio::spawn(session).await {
        tracing::error!(connection = %connection, error = %e, "Connection task aborted");
    }
    handle_disconnect(&state, connection).await;
}

/// Heartbeat 처리
pub fn handle_heartbeat(connection: &ConnectionHandle) {
    connection.send(ServerMessage::HeartbeatAck);
}

/// `user-online`: 레지스트리 등록 후 접속자 목록 브로드캐스트
pub async fn handle_user_online(state: &AppState, connection: &ConnectionHandle, user: UserRef) {
    let user_id = user.user_id().trim();
    if user_id.is_empty() {
        tracing::warn!(connection = %connection.id(), "Dropped user-online without userId");
        return;
    }

    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    // 같은 연결로 다른 사용자가 로그인하면 이전 사용자는 로그아웃 처리
    let rebinding = core
        .registry
        .resolve_owner(connection.id())
        .map(|owner| owner != user_id)
        .unwrap_or(false);
    if rebinding {
        reconcile(state, core, connection.id());
    }

    let outcome = core
        .registry
        .register(user_id, connection.clone(), user.username(), Utc::now());
    presence::publish(&core.registry);

    match outcome {
        Registration::New => {
            tracing::info!(
                user_id = %user_id,
                connection = %connection.id(),
                online = core.registry.len(),
                "User online"
            );
        }
        Registration::Replaced { stale } => {
            tracing::info!(
                user_id = %user_id,
                connection = %connection.id(),
                stale = %stale,
                "User reconnected, stale connection evicted"
            );
        }
        Registration::Refreshed => {
            tracing::debug!(user_id = %user_id, "User online refreshed");
        }
    }
}

/// `user-offline`: 연결 종료와 같은 정리 경로를 탄다
pub async fn handle_user_offline(state: &AppState, connection: &ConnectionHandle, user: UserRef) {
    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(user_id) = core.acting_user(connection.id(), Some(user.user_id())) else {
        tracing::warn!(connection = %connection.id(), "Dropped user-offline without userId");
        return;
    };

    match core.registry.resolve(&user_id).map(ConnectionHandle::id) {
        Some(owner) => {
            reconcile(state, core, owner);
        }
        None => tracing::debug!(user_id = %user_id, "user-offline for unknown user ignored"),
    }
}

/// 요청한 연결에만 현재 목록 전송
pub async fn handle_get_online_users(state: &AppState, connection: &ConnectionHandle) {
    let users = state.core.lock().await.registry.snapshot();
    connection.send(ServerMessage::OnlineUsers(users));
}

/// 연결 손실 정리
///
/// 비정상 종료와 로그아웃 모두 여기로 모인다. 호출자가 코어 락을 잡고 있으므로
/// 다른 이벤트가 반쯤 정리된 상태를 보는 일은 없다.
/// 이미 밀려난 연결이면 아무 일도 하지 않는다.
pub(crate) fn reconcile(state: &AppState, core: &mut SignalingCore, connection: ConnectionId) -> bool {
    let Some(user_id) = core.registry.resolve_owner(connection).map(str::to_string) else {
        return false;
    };

    core.registry.unregister(&user_id);
    presence::publish(&core.registry);

    if let Some(record) = core.calls.abort_for(&user_id, Utc::now()) {
        let peer_id = record.peer_of(&user_id).to_string();
        core.send_to_user(
            &peer_id,
            ServerMessage::CallEnded {
                from_user_id: user_id.clone(),
                reason: Some(CallOutcome::Failed),
                duration_seconds: record.duration_seconds,
            },
        );
        state.history.persist(&record);
        tracing::info!(
            user_id = %user_id,
            peer_id = %peer_id,
            call_id = %record.call_id,
            "Call ended by disconnect"
        );
    }

    for outcome in core.rooms.remove_everywhere(&user_id) {
        room::notify_participant_left(core, &outcome, &user_id);
    }

    tracing::info!(user_id = %user_id, online = core.registry.len(), "User offline");
    true
}
