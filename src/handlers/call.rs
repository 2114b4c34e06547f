//! 1:1 통화 핸들러

use super::{non_empty, reply_error};
use crate::error::SignalError;
use crate::protocol::ServerMessage;
use crate::state::{AppState, CallOutcome, ConnectionHandle, SignalingCore};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// `call-user` 처리
pub async fn handle_call_user(
    state: &AppState,
    connection: &ConnectionHandle,
    to_user_id: &str,
    from_user_id: Option<&str>,
    from_username: Option<&str>,
    offer: Value,
) {
    let Some(callee_id) = non_empty(to_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped call-user without toUserId");
        return;
    };

    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(caller_id) = core.acting_user(connection.id(), from_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped call-user without sender");
        return;
    };

    match initiate(core, &caller_id, callee_id, from_username, offer) {
        Ok(call_id) => {
            tracing::info!(
                call_id = %call_id,
                caller = %caller_id,
                callee = %callee_id,
                "Call ringing"
            );
        }
        Err(e) => {
            tracing::info!(caller = %caller_id, callee = %callee_id, reason = %e, "Call rejected");
            reply_error(connection, &e);
        }
    }
}

fn initiate(
    core: &mut SignalingCore,
    caller_id: &str,
    callee_id: &str,
    caller_name: Option<&str>,
    offer: Value,
) -> Result<Uuid, SignalError> {
    if !core.registry.is_online(callee_id) {
        return Err(SignalError::PeerUnavailable(callee_id.to_string()));
    }

    let caller_name = core.display_name(caller_id, caller_name);
    let callee_name = core.display_name(callee_id, None);
    let call_id = core
        .calls
        .initiate(caller_id, callee_id, &caller_name, &callee_name, Utc::now())?
        .call_id;

    core.send_to_user(
        callee_id,
        ServerMessage::IncomingCall {
            call_id,
            from_user_id: caller_id.to_string(),
            from_username: caller_name,
            offer,
        },
    );
    Ok(call_id)
}

/// `accept-call` 처리: 수신자가 보낸다. `to_user_id`는 발신자
pub async fn handle_accept_call(
    state: &AppState,
    connection: &ConnectionHandle,
    to_user_id: &str,
    from_user_id: Option<&str>,
    answer: Value,
) {
    let Some(caller_id) = non_empty(to_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped accept-call without toUserId");
        return;
    };

    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(callee_id) = core.acting_user(connection.id(), from_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped accept-call without sender");
        return;
    };

    let accepted = core
        .calls
        .accept(&callee_id, caller_id, Utc::now())
        .map(|session| session.call_id);

    match accepted {
        Ok(call_id) => {
            core.send_to_user(
                caller_id,
                ServerMessage::CallAccepted {
                    call_id,
                    from_user_id: callee_id.clone(),
                    answer,
                },
            );
            tracing::info!(call_id = %call_id, caller = %caller_id, callee = %callee_id, "Call connected");
        }
        Err(e) => {
            tracing::debug!(caller = %caller_id, callee = %callee_id, "Stale accept-call");
            reply_error(connection, &e);
        }
    }
}

/// `decline-call` 처리: 수신자가 보낸다. `to_user_id`는 발신자
pub async fn handle_decline_call(
    state: &AppState,
    connection: &ConnectionHandle,
    to_user_id: &str,
    from_user_id: Option<&str>,
) {
    let Some(caller_id) = non_empty(to_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped decline-call without toUserId");
        return;
    };

    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(callee_id) = core.acting_user(connection.id(), from_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped decline-call without sender");
        return;
    };

    match core.calls.decline(&callee_id, caller_id, Utc::now()) {
        Ok(record) => {
            core.send_to_user(
                caller_id,
                ServerMessage::CallDeclined {
                    from_user_id: callee_id.clone(),
                },
            );
            state.history.persist(&record);
            tracing::info!(call_id = %record.call_id, caller = %caller_id, callee = %callee_id, "Call declined");
        }
        Err(e) => {
            tracing::debug!(caller = %caller_id, callee = %callee_id, "Stale decline-call");
            reply_error(connection, &e);
        }
    }
}

/// `end-call` 처리: 어느 쪽이든 보낼 수 있다
///
/// 세션이 없더라도 상대가 온라인이면 `call-ended`를 전달해 상대 화면을 정리한다.
pub async fn handle_end_call(
    state: &AppState,
    connection: &ConnectionHandle,
    to_user_id: &str,
    from_user_id: Option<&str>,
) {
    let Some(peer_id) = non_empty(to_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped end-call without toUserId");
        return;
    };

    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(user_id) = core.acting_user(connection.id(), from_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped end-call without sender");
        return;
    };

    let record = core.calls.end(&user_id, peer_id, Utc::now());

    core.send_to_user(
        peer_id,
        ServerMessage::CallEnded {
            from_user_id: user_id.clone(),
            reason: record.as_ref().and_then(|r| r.outcome),
            duration_seconds: record.as_ref().and_then(|r| r.duration_seconds),
        },
    );

    match record {
        Some(record) => {
            state.history.persist(&record);
            tracing::info!(
                call_id = %record.call_id,
                user_id = %user_id,
                peer_id = %peer_id,
                outcome = ?record.outcome,
                duration_secs = ?record.duration_seconds,
                "Call ended"
            );
        }
        None => tracing::debug!(user_id = %user_id, peer_id = %peer_id, "end-call without active session"),
    }
}

/// 응답 없는 Ringing 세션 만료 (링 타임아웃이 설정된 경우에만)
pub async fn expire_unanswered_calls(state: &AppState) -> usize {
    let Some(timeout_secs) = state.config.call.ring_timeout_secs else {
        return 0;
    };

    let now = Utc::now();
    let deadline = i64::try_from(timeout_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|timeout| now.checked_sub_signed(timeout));
    let Some(deadline) = deadline else {
        tracing::warn!(ring_timeout_secs = timeout_secs, "Ring timeout out of range, skipping sweep");
        return 0;
    };

    let mut guard = state.core.lock().await;
    let core = &mut *guard;
    let expired = core.calls.expire_ringing(deadline, now);

    for record in &expired {
        core.send_to_user(
            &record.caller_id,
            ServerMessage::CallEnded {
                from_user_id: record.callee_id.clone(),
                reason: Some(CallOutcome::Missed),
                duration_seconds: Some(0),
            },
        );
        core.send_to_user(
            &record.callee_id,
            ServerMessage::CallEnded {
                from_user_id: record.caller_id.clone(),
                reason: Some(CallOutcome::Missed),
                duration_seconds: Some(0),
            },
        );
        state.history.persist(record);
        tracing::info!(
            call_id = %record.call_id,
            caller = %record.caller_id,
            callee = %record.callee_id,
            "Unanswered call expired"
        );
    }

    expired.len()
}
