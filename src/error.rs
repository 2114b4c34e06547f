//! 시그널링 거절 사유
//!
//! 모두 요청한 연결에게만 이벤트로 회신되고, 다른 연결이나 전송 계층에는 전파되지 않는다.

use crate::protocol::ServerMessage;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("user {0} is not online")]
    PeerUnavailable(String),

    #[error("user {0} is already in a call")]
    Busy(String),

    #[error("room {0} does not exist")]
    RoomNotFound(String),

    #[error("already a participant of room {0}")]
    AlreadyInRoom(String),

    #[error("room {0} already exists")]
    RoomExists(String),

    #[error("room {0} is full")]
    RoomFull(String),

    #[error("no pending call with {0}")]
    StaleSignal(String),

    #[error("you are already in a call")]
    AlreadyInCall,

    #[error("cannot call yourself")]
    SelfCall,
}

impl SignalError {
    /// 요청자에게 보낼 이벤트로 변환
    pub fn to_message(&self) -> ServerMessage {
        match self {
            SignalError::PeerUnavailable(user_id) => ServerMessage::UserNotAvailable {
                user_id: user_id.clone(),
            },
            SignalError::Busy(user_id) => ServerMessage::UserBusy {
                user_id: user_id.clone(),
            },
            SignalError::RoomNotFound(room_id) => ServerMessage::RoomNotFound {
                room_id: room_id.clone(),
            },
            SignalError::AlreadyInRoom(room_id) => ServerMessage::AlreadyInRoom {
                room_id: room_id.clone(),
            },
            SignalError::RoomExists(room_id) => ServerMessage::RoomExists {
                room_id: room_id.clone(),
            },
            SignalError::RoomFull(room_id) => ServerMessage::RoomFull {
                room_id: room_id.clone(),
            },
            SignalError::StaleSignal(user_id) => ServerMessage::StaleSignal {
                user_id: user_id.clone(),
            },
            SignalError::AlreadyInCall | SignalError::SelfCall => ServerMessage::Error {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SignalError::PeerUnavailable(_) => "user-not-available",
            SignalError::Busy(_) => "user-busy",
            SignalError::RoomNotFound(_) => "room-not-found",
            SignalError::AlreadyInRoom(_) => "already-in-room",
            SignalError::RoomExists(_) => "room-exists",
            SignalError::RoomFull(_) => "room-full",
            SignalError::StaleSignal(_) => "stale-signal",
            SignalError::AlreadyInCall => "already-in-call",
            SignalError::SelfCall => "self-call",
        }
    }
}
