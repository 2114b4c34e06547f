//! 핸들러 모듈
//!
//! 연결마다 수신한 메시지를 도착 순서대로 `handle_client_message`에 넘긴다.
//! 각 이벤트는 정확히 하나의 컴포넌트 핸들러로 보내진다.

pub mod call;
pub mod connection;
pub mod presence;
pub mod room;
pub mod signaling;

pub use call::*;
pub use connection::*;
pub use room::*;
pub use signaling::*;

use crate::error::SignalError;
use crate::protocol::ClientMessage;
use crate::state::{AppState, ConnectionHandle};

/// 클라이언트 메시지 분배
pub async fn handle_client_message(state: &AppState, connection: &ConnectionHandle, msg: ClientMessage) {
    match msg {
        ClientMessage::Heartbeat => {
            handle_heartbeat(connection);
        }
        ClientMessage::UserOnline(user) => {
            handle_user_online(state, connection, user).await;
        }
        ClientMessage::UserOffline(user) => {
            handle_user_offline(state, connection, user).await;
        }
        ClientMessage::GetOnlineUsers => {
            handle_get_online_users(state, connection).await;
        }
        ClientMessage::CallUser {
            to_user_id,
            from_user_id,
            from_username,
            offer,
        } => {
            handle_call_user(
                state,
                connection,
                &to_user_id,
                from_user_id.as_deref(),
                from_username.as_deref(),
                offer,
            )
            .await;
        }
        ClientMessage::AcceptCall {
            to_user_id,
            from_user_id,
            answer,
        } => {
            handle_accept_call(state, connection, &to_user_id, from_user_id.as_deref(), answer)
                .await;
        }
        ClientMessage::DeclineCall {
            to_user_id,
            from_user_id,
        } => {
            handle_decline_call(state, connection, &to_user_id, from_user_id.as_deref()).await;
        }
        ClientMessage::EndCall {
            to_user_id,
            from_user_id,
        } => {
            handle_end_call(state, connection, &to_user_id, from_user_id.as_deref()).await;
        }
        ClientMessage::IceCandidate {
            to_user_id,
            from_user_id,
            candidate,
            room_id,
        } => {
            handle_ice_candidate(
                state,
                connection,
                &to_user_id,
                from_user_id.as_deref(),
                candidate,
                room_id,
            )
            .await;
        }
        ClientMessage::WebrtcOffer {
            room_id,
            to_user_id,
            from_user_id,
            offer,
        } => {
            handle_offer(state, connection, room_id, &to_user_id, from_user_id.as_deref(), offer)
                .await;
        }
        ClientMessage::WebrtcAnswer {
            room_id,
            to_user_id,
            from_user_id,
            answer,
        } => {
            handle_answer(state, connection, room_id, &to_user_id, from_user_id.as_deref(), answer)
                .await;
        }
        ClientMessage::CreateRoom {
            room_id,
            user_id,
            username,
            profile_pic,
        } => {
            handle_create_room(
                state,
                connection,
                RoomRequest {
                    room_id: &room_id,
                    user_id: user_id.as_deref(),
                    username: username.as_deref(),
                    profile_pic: profile_pic.as_deref(),
                },
            )
            .await;
        }
        ClientMessage::JoinRoom {
            room_id,
            user_id,
            username,
            profile_pic,
        } => {
            handle_join_room(
                state,
                connection,
                RoomRequest {
                    room_id: &room_id,
                    user_id: user_id.as_deref(),
                    username: username.as_deref(),
                    profile_pic: profile_pic.as_deref(),
                },
            )
            .await;
        }
        ClientMessage::LeaveRoom { room_id, user_id } => {
            handle_leave_room(state, connection, &room_id, user_id.as_deref()).await;
        }
        ClientMessage::InviteToGroupCall {
            to_user_id,
            from_user_id,
            from_username,
            room_id,
        } => {
            handle_invite_to_room(
                state,
                connection,
                &room_id,
                &to_user_id,
                from_user_id.as_deref(),
                from_username.as_deref(),
            )
            .await;
        }
    }
}

/// 거절 사유는 요청한 연결에만 회신
pub(crate) fn reply_error(connection: &ConnectionHandle, error: &SignalError) {
    connection.send(error.to_message());
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::protocol::{ServerMessage, UserRef};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// 채널 수신 측을 들고 있는 가짜 클라이언트
    pub struct Client {
        pub handle: ConnectionHandle,
        pub rx: UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        pub fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                messages.push(message);
            }
            messages
        }
    }

    pub async fn connect(state: &AppState) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = handle_connection(state, tx).await;
        Client { handle, rx }
    }

    pub async fn user_online(state: &AppState, client: &Client, user_id: &str) {
        handle_client_message(
            state,
            &client.handle,
            ClientMessage::UserOnline(UserRef::Id(user_id.to_string())),
        )
        .await;
    }

    pub async fn online(state: &AppState, user_id: &str) -> Client {
        let client = connect(state).await;
        user_online(state, &client, user_id).await;
        client
    }
}
