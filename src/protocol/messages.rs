//! 클라이언트-서버 메시지 프로토콜 정의
//!
//! 모든 프레임은 `{"type": "<event>", "payload": ...}` 형태의 JSON 텍스트다.
//! SDP, ICE 후보 같은 WebRTC 페이로드는 해석하지 않고 그대로 중계한다.

use crate::state::CallOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    // Connection
    Heartbeat,

    // Presence
    UserOnline(UserRef),
    UserOffline(UserRef),
    GetOnlineUsers,

    // 1:1 Call
    CallUser {
        to_user_id: String,
        from_user_id: Option<String>,
        from_username: Option<String>,
        offer: Value,
    },
    AcceptCall {
        to_user_id: String,
        from_user_id: Option<String>,
        answer: Value,
    },
    DeclineCall {
        to_user_id: String,
        from_user_id: Option<String>,
    },
    EndCall {
        to_user_id: String,
        from_user_id: Option<String>,
    },

    // WebRTC Signaling
    IceCandidate {
        to_user_id: String,
        from_user_id: Option<String>,
        candidate: Value,
        room_id: Option<String>,
    },
    WebrtcOffer {
        room_id: String,
        to_user_id: String,
        from_user_id: Option<String>,
        offer: Value,
    },
    WebrtcAnswer {
        room_id: String,
        to_user_id: String,
        from_user_id: Option<String>,
        answer: Value,
    },

    // Room Management
    CreateRoom {
        room_id: String,
        user_id: Option<String>,
        username: Option<String>,
        profile_pic: Option<String>,
    },
    JoinRoom {
        room_id: String,
        user_id: Option<String>,
        username: Option<String>,
        profile_pic: Option<String>,
    },
    LeaveRoom {
        room_id: String,
        user_id: Option<String>,
    },
    InviteToGroupCall {
        to_user_id: String,
        from_user_id: Option<String>,
        from_username: Option<String>,
        room_id: String,
    },
}

/// `user-online`/`user-offline` 페이로드: 문자열 ID 또는 객체
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        user_id: String,
        #[serde(default)]
        username: Option<String>,
    },
}

impl UserRef {
    pub fn user_id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Detailed { user_id, .. } => user_id,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            UserRef::Id(_) => None,
            UserRef::Detailed { username, .. } => username.as_deref(),
        }
    }
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    // Connection
    Connected { connection_id: String },
    HeartbeatAck,
    Error { code: String, message: String },

    // Presence
    OnlineUsers(Vec<String>),

    // 1:1 Call
    IncomingCall {
        call_id: Uuid,
        from_user_id: String,
        from_username: String,
        offer: Value,
    },
    CallAccepted {
        call_id: Uuid,
        from_user_id: String,
        answer: Value,
    },
    CallDeclined {
        from_user_id: String,
    },
    CallEnded {
        from_user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<CallOutcome>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<i64>,
    },
    UserBusy {
        user_id: String,
    },
    UserNotAvailable {
        user_id: String,
    },
    StaleSignal {
        user_id: String,
    },

    // WebRTC Signaling
    IceCandidate {
        from_user_id: String,
        candidate: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
    WebrtcOffer {
        room_id: String,
        from_user_id: String,
        offer: Value,
    },
    WebrtcAnswer {
        room_id: String,
        from_user_id: String,
        answer: Value,
    },

    // Room Events
    RoomJoined {
        room_id: String,
        participants: Vec<ParticipantInfo>,
    },
    NewParticipant {
        room_id: String,
        user_id: String,
        username: String,
        profile_pic: Option<String>,
    },
    /// 입장한 본인에게 기존 참가자를 한 명씩 소개
    NewParticipantJoining {
        room_id: String,
        user_id: String,
        username: String,
        profile_pic: Option<String>,
    },
    ParticipantLeft {
        room_id: String,
        user_id: String,
    },
    IncomingGroupCall {
        room_id: String,
        from_user_id: String,
        from_username: String,
    },
    RoomNotFound {
        room_id: String,
    },
    AlreadyInRoom {
        room_id: String,
    },
    RoomExists {
        room_id: String,
    },
    RoomFull {
        room_id: String,
    },
}

/// 방 참가자 공개 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: String,
    pub username: String,
    pub profile_pic: Option<String>,
}
