//! 방 관리 핸들러

use super::{non_empty, reply_error};
use crate::error::SignalError;
use crate::protocol::ServerMessage;
use crate::state::{AppState, ConnectionHandle, LeaveOutcome, Participant, SignalingCore};
use chrono::Utc;

/// 방 생성/참여 요청 공통 필드
pub struct RoomRequest<'a> {
    pub room_id: &'a str,
    pub user_id: Option<&'a str>,
    pub username: Option<&'a str>,
    pub profile_pic: Option<&'a str>,
}

/// 방 생성 처리: 생성자가 첫 참가자
pub async fn handle_create_room(
    state: &AppState,
    connection: &ConnectionHandle,
    request: RoomRequest<'_>,
) {
    let Some(room_id) = non_empty(request.room_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped create-room without roomId");
        return;
    };

    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(participant) = build_participant(core, connection, &request) else {
        tracing::warn!(connection = %connection.id(), "Dropped create-room without sender");
        return;
    };
    let user_id = participant.user_id.clone();

    let created = core
        .rooms
        .create_room(room_id, participant, Utc::now())
        .map(|room| room.participant_infos());

    match created {
        Ok(participants) => {
            connection.send(ServerMessage::RoomJoined {
                room_id: room_id.to_string(),
                participants,
            });
            leave_other_rooms(core, &user_id, room_id);
            tracing::info!(room_id = %room_id, user_id = %user_id, "Room created");
        }
        Err(e) => {
            tracing::info!(room_id = %room_id, user_id = %user_id, reason = %e, "Room creation rejected");
            reply_error(connection, &e);
        }
    }
}

/// 방 참여 처리
///
/// 참여자 본인에게 `room-joined`와 기존 참가자별 `new-participant-joining`(입장 순)을 보낸 뒤
/// 기존 참가자들에게 `new-participant`를 보낸다. 기존 참가자 각각이 새 참가자에게 offer를 건다.
pub async fn handle_join_room(state: &AppState, connection: &ConnectionHandle, request: RoomRequest<'_>) {
    let Some(room_id) = non_empty(request.room_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped join-room without roomId");
        return;
    };

    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(participant) = build_participant(core, connection, &request) else {
        tracing::warn!(connection = %connection.id(), "Dropped join-room without sender");
        return;
    };
    let joiner = participant.info();

    let outcome = match core.rooms.join_room(room_id, participant) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::info!(room_id = %room_id, user_id = %joiner.user_id, reason = %e, "Join rejected");
            reply_error(connection, &e);
            return;
        }
    };

    connection.send(ServerMessage::RoomJoined {
        room_id: room_id.to_string(),
        participants: outcome.participants.iter().map(Participant::info).collect(),
    });

    for existing in outcome.existing.iter().map(Participant::info) {
        connection.send(ServerMessage::NewParticipantJoining {
            room_id: room_id.to_string(),
            user_id: existing.user_id,
            username: existing.username,
            profile_pic: existing.profile_pic,
        });
    }

    for existing in &outcome.existing {
        core.send_to_user(
            &existing.user_id,
            ServerMessage::NewParticipant {
                room_id: room_id.to_string(),
                user_id: joiner.user_id.clone(),
                username: joiner.username.clone(),
                profile_pic: joiner.profile_pic.clone(),
            },
        );
    }

    leave_other_rooms(core, &joiner.user_id, room_id);

    tracing::info!(
        room_id = %room_id,
        user_id = %joiner.user_id,
        participants = outcome.participants.len(),
        "User joined room"
    );
}

/// 방 나가기 처리 (참가자가 아니면 무시)
pub async fn handle_leave_room(
    state: &AppState,
    connection: &ConnectionHandle,
    room_id: &str,
    user_id: Option<&str>,
) {
    let mut guard = state.core.lock().await;
    let core = &mut *guard;

    let Some(user_id) = core.acting_user(connection.id(), user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped leave-room without sender");
        return;
    };

    match core.rooms.leave_room(room_id.trim(), &user_id) {
        Some(outcome) => notify_participant_left(core, &outcome, &user_id),
        None => tracing::debug!(room_id = %room_id, user_id = %user_id, "leave-room for non-member ignored"),
    }
}

/// 그룹 통화 초대 중계. 초대만 전달하고 참여는 초대받은 쪽이 `join-room`으로 한다.
pub async fn handle_invite_to_room(
    state: &AppState,
    connection: &ConnectionHandle,
    room_id: &str,
    to_user_id: &str,
    from_user_id: Option<&str>,
    from_username: Option<&str>,
) {
    let (Some(room_id), Some(invitee_id)) = (non_empty(room_id), non_empty(to_user_id)) else {
        tracing::warn!(connection = %connection.id(), "Dropped invite without roomId or toUserId");
        return;
    };

    let guard = state.core.lock().await;
    let core = &*guard;

    let Some(inviter_id) = core.acting_user(connection.id(), from_user_id) else {
        tracing::warn!(connection = %connection.id(), "Dropped invite without sender");
        return;
    };

    if core.rooms.get(room_id).is_none() {
        reply_error(connection, &SignalError::RoomNotFound(room_id.to_string()));
        return;
    }

    let delivered = core.send_to_user(
        invitee_id,
        ServerMessage::IncomingGroupCall {
            room_id: room_id.to_string(),
            from_user_id: inviter_id.clone(),
            from_username: core.display_name(&inviter_id, from_username),
        },
    );

    if delivered {
        tracing::info!(room_id = %room_id, inviter = %inviter_id, invitee = %invitee_id, "Group call invitation sent");
    } else {
        reply_error(connection, &SignalError::PeerUnavailable(invitee_id.to_string()));
    }
}

/// 남은 참가자에게 퇴장 알림
pub(crate) fn notify_participant_left(core: &SignalingCore, outcome: &LeaveOutcome, user_id: &str) {
    for participant in &outcome.remaining {
        core.send_to_user(
            &participant.user_id,
            ServerMessage::ParticipantLeft {
                room_id: outcome.room_id.clone(),
                user_id: user_id.to_string(),
            },
        );
    }

    tracing::info!(
        room_id = %outcome.room_id,
        user_id = %user_id,
        remaining = outcome.remaining.len(),
        "User left room"
    );
    if outcome.room_deleted {
        tracing::info!(room_id = %outcome.room_id, "Room deleted");
    }
}

/// 사용자는 한 번에 한 방에만 머문다
fn leave_other_rooms(core: &mut SignalingCore, user_id: &str, keep_room_id: &str) {
    for room_id in core.rooms.rooms_of(user_id) {
        if room_id == keep_room_id {
            continue;
        }
        if let Some(outcome) = core.rooms.leave_room(&room_id, user_id) {
            notify_participant_left(core, &outcome, user_id);
        }
    }
}

fn build_participant(
    core: &SignalingCore,
    connection: &ConnectionHandle,
    request: &RoomRequest<'_>,
) -> Option<Participant> {
    let user_id = core.acting_user(connection.id(), request.user_id)?;
    let display_name = core.display_name(&user_id, request.username);
    Some(Participant {
        user_id,
        display_name,
        profile_pic: request
            .profile_pic
            .filter(|pic| !pic.trim().is_empty())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::testing::{online, Client};

    fn request<'a>(room_id: &'a str, user_id: &'a str) -> RoomRequest<'a> {
        RoomRequest {
            room_id,
            user_id: Some(user_id),
            username: None,
            profile_pic: None,
        }
    }

    async fn create(state: &AppState, client: &Client, room_id: &str, user_id: &str) {
        handle_create_room(state, &client.handle, request(room_id, user_id)).await;
    }

    async fn join(state: &AppState, client: &Client, room_id: &str, user_id: &str) {
        handle_join_room(state, &client.handle, request(room_id, user_id)).await;
    }

    fn joined_ids(messages: &[ServerMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::NewParticipant { user_id, .. } => Some(user_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn introduced_ids(messages: &[ServerMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::NewParticipantJoining { user_id, .. } => Some(user_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn left_ids(messages: &[ServerMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::ParticipantLeft { user_id, .. } => Some(user_id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_three_party_room_scenario() {
        let state = AppState::new(Config::default());
        let mut a = online(&state, "a").await;
        let mut b = online(&state, "b").await;
        let mut c = online(&state, "c").await;
        for client in [&mut a, &mut b, &mut c] {
            client.drain();
        }

        create(&state, &a, "R", "a").await;
        join(&state, &b, "R", "b").await;
        join(&state, &c, "R", "c").await;

        let a_msgs = a.drain();
        let b_msgs = b.drain();
        let c_msgs = c.drain();

        assert_eq!(joined_ids(&a_msgs), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(joined_ids(&b_msgs), vec!["c".to_string()]);
        assert!(joined_ids(&c_msgs).is_empty());
        assert_eq!(introduced_ids(&b_msgs), vec!["a".to_string()]);
        assert_eq!(introduced_ids(&c_msgs), vec!["a".to_string(), "b".to_string()]);
        assert!(introduced_ids(&a_msgs).is_empty());

        // c는 참가자 목록을 받은 뒤 입장 순서대로 기존 참가자 소개를 받는다
        match c_msgs.as_slice() {
            [ServerMessage::RoomJoined { room_id, participants }, ServerMessage::NewParticipantJoining { .. }, ServerMessage::NewParticipantJoining { .. }] =>
            {
                assert_eq!(room_id, "R");
                let ids: Vec<_> = participants.iter().map(|p| p.user_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        handle_leave_room(&state, &b.handle, "R", Some("b")).await;
        assert_eq!(left_ids(&a.drain()), vec!["b".to_string()]);
        assert_eq!(left_ids(&c.drain()), vec!["b".to_string()]);
        assert!(b.drain().is_empty());

        let core = state.core.lock().await;
        let ids: Vec<_> = core
            .rooms
            .get("R")
            .unwrap()
            .participants
            .iter()
            .map(|p| p.user_id.clone())
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_room_joined_precedes_peer_notifications() {
        let state = AppState::new(Config::default());
        let a = online(&state, "a").await;
        let mut b = online(&state, "b").await;
        create(&state, &a, "R", "a").await;
        b.drain();

        join(&state, &b, "R", "b").await;
        assert!(matches!(b.drain().first(), Some(ServerMessage::RoomJoined { .. })));
    }

    #[tokio::test]
    async fn test_join_missing_room_replies_not_found() {
        let state = AppState::new(Config::default());
        let mut a = online(&state, "a").await;
        a.drain();

        join(&state, &a, "nope", "a").await;
        match a.drain().as_slice() {
            [ServerMessage::RoomNotFound { room_id }] => assert_eq!(room_id, "nope"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state.core.lock().await.rooms.len(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_create_and_join() {
        let state = AppState::new(Config::default());
        let mut a = online(&state, "a").await;
        let mut b = online(&state, "b").await;
        create(&state, &a, "R", "a").await;
        a.drain();
        b.drain();

        join(&state, &a, "R", "a").await;
        assert!(matches!(a.drain().as_slice(), [ServerMessage::AlreadyInRoom { .. }]));

        create(&state, &b, "R", "b").await;
        assert!(matches!(b.drain().as_slice(), [ServerMessage::RoomExists { .. }]));
    }

    #[tokio::test]
    async fn test_room_full() {
        let mut config = Config::default();
        config.room.max_size = 2;
        let state = AppState::new(config);
        let a = online(&state, "a").await;
        let b = online(&state, "b").await;
        let mut c = online(&state, "c").await;

        create(&state, &a, "R", "a").await;
        join(&state, &b, "R", "b").await;
        c.drain();
        join(&state, &c, "R", "c").await;

        assert!(matches!(c.drain().as_slice(), [ServerMessage::RoomFull { .. }]));
    }

    #[tokio::test]
    async fn test_last_leave_deletes_room() {
        let state = AppState::new(Config::default());
        let mut a = online(&state, "a").await;
        create(&state, &a, "R", "a").await;

        handle_leave_room(&state, &a.handle, "R", None).await;
        assert!(state.core.lock().await.rooms.get("R").is_none());

        a.drain();
        join(&state, &a, "R", "a").await;
        assert!(matches!(a.drain().as_slice(), [ServerMessage::RoomNotFound { .. }]));
    }

    #[tokio::test]
    async fn test_joining_another_room_leaves_previous() {
        let state = AppState::new(Config::default());
        let mut a = online(&state, "a").await;
        let b = online(&state, "b").await;
        create(&state, &a, "R1", "a").await;
        join(&state, &b, "R1", "b").await;
        create(&state, &b, "R2", "b").await;

        assert_eq!(left_ids(&a.drain()), vec!["b".to_string()]);
        let core = state.core.lock().await;
        assert_eq!(core.rooms.rooms_of("b"), vec!["R2".to_string()]);
        assert_eq!(core.rooms.get("R1").unwrap().participants.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_room_membership() {
        let state = AppState::new(Config::default());
        let mut a = online(&state, "a").await;
        let b = online(&state, "b").await;
        create(&state, &a, "R", "a").await;
        join(&state, &b, "R", "b").await;
        a.drain();

        crate::handlers::handle_disconnect(&state, b.handle.id()).await;

        assert_eq!(left_ids(&a.drain()), vec!["b".to_string()]);
        assert_eq!(state.core.lock().await.rooms.rooms_of("b"), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_invite_relays_to_online_invitee() {
        let state = AppState::new(Config::default());
        let mut a = online(&state, "a").await;
        let mut b = online(&state, "b").await;
        create(&state, &a, "R", "a").await;
        a.drain();
        b.drain();

        handle_invite_to_room(&state, &a.handle, "R", "b", None, Some("Alice")).await;
        match b.drain().as_slice() {
            [ServerMessage::IncomingGroupCall { room_id, from_user_id, from_username }] => {
                assert_eq!(room_id, "R");
                assert_eq!(from_user_id, "a");
                assert_eq!(from_username, "Alice");
            }
            other => panic!("unexpected {:?}", other),
        }
        // 초대만으로는 참가자가 되지 않는다
        assert!(!state.core.lock().await.rooms.get("R").unwrap().contains("b"));
        assert!(a.drain().is_empty());

        handle_invite_to_room(&state, &a.handle, "R", "ghost", None, None).await;
        assert!(matches!(a.drain().as_slice(), [ServerMessage::UserNotAvailable { .. }]));

        handle_invite_to_room(&state, &a.handle, "missing", "b", None, None).await;
        assert!(matches!(a.drain().as_slice(), [ServerMessage::RoomNotFound { .. }]));
    }
}
