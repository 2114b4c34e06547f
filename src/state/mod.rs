//! 애플리케이션 상태 관리
//!
//! 시그널링 상태(레지스트리, 통화, 방)는 하나의 비동기 뮤텍스 뒤에 있다.
//! 상태 변경과 그에 따른 알림 전송을 같은 임계 구역에서 처리해
//! 오래된 스냅샷이 새 스냅샷보다 늦게 도착하는 일이 없게 한다.

mod calls;
mod registry;
mod rooms;

pub use calls::{CallOutcome, CallSession, CallSessionManager};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Registration};
pub use rooms::{LeaveOutcome, Participant, RoomManager};

use crate::config::Config;
use crate::history::HistoryRecorder;
use crate::protocol::ServerMessage;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, Mutex};

/// 연결별 송신 채널
pub type ClientSender = UnboundedSender<ServerMessage>;

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 열린 연결 (connection_id -> PeerSession), 등록 여부와 무관
    pub peers: DashMap<ConnectionId, PeerSession>,
    /// 시그널링 상태
    pub core: Mutex<SignalingCore>,
    /// 종료된 통화 저장
    pub history: HistoryRecorder,
    /// 설정
    pub config: Arc<Config>,
}

impl AppState {
    #[cfg(test)]
    pub fn new(config: Config) -> Self {
        Self::with_history(config, HistoryRecorder::disabled())
    }

    pub fn with_history(config: Config, history: HistoryRecorder) -> Self {
        Self {
            peers: DashMap::new(),
            core: Mutex::new(SignalingCore::new(&config)),
            history,
            config: Arc::new(config),
        }
    }
}

/// 열린 연결 정보
pub struct PeerSession {
    #[allow(dead_code)]
    pub handle: ConnectionHandle,
    pub connected_at: Instant,
}

pub struct SignalingCore {
    pub registry: ConnectionRegistry,
    pub calls: CallSessionManager,
    pub rooms: RoomManager,
}

impl SignalingCore {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            calls: CallSessionManager::new(config.call.history_capacity),
            rooms: RoomManager::new(config.room.max_size),
        }
    }

    /// 오프라인이면 조용히 버린다
    pub fn send_to_user(&self, user_id: &str, message: ServerMessage) -> bool {
        match self.registry.resolve(user_id) {
            Some(connection) => connection.send(message),
            None => false,
        }
    }

    /// 이벤트를 보낸 사용자 결정
    ///
    /// `user-online`으로 묶인 신원이 있으면 페이로드의 주장보다 우선한다.
    pub fn acting_user(&self, connection: ConnectionId, claimed: Option<&str>) -> Option<String> {
        let claimed = claimed.map(str::trim).filter(|id| !id.is_empty());
        match self.registry.resolve_owner(connection) {
            Some(bound) => {
                if let Some(claimed) = claimed {
                    if claimed != bound {
                        tracing::warn!(
                            connection = %connection,
                            bound = %bound,
                            claimed = %claimed,
                            "Ignoring claimed sender id that differs from bound user"
                        );
                    }
                }
                Some(bound.to_string())
            }
            None => claimed.map(str::to_string),
        }
    }

    /// 등록된 표시 이름, 없으면 힌트나 user_id
    pub fn display_name(&self, user_id: &str, hint: Option<&str>) -> String {
        if let Some(hint) = hint.filter(|h| !h.trim().is_empty()) {
            return hint.to_string();
        }
        self.registry
            .get(user_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }
}
