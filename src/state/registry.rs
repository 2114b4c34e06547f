//! 온라인 사용자 레지스트리
//!
//! `user_id -> 연결`과 `연결 -> user_id`를 항상 함께 갱신한다.
//! 사용자당 살아 있는 연결은 최대 하나이며, 새 연결이 등록되면 이전 매핑은 병합되지 않고 밀려난다.

use super::ClientSender;
use crate::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// 연결 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 살아 있는 연결로 메시지를 보낼 수 있는 핸들
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: ClientSender,
}

impl ConnectionHandle {
    pub fn new(sender: ClientSender) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 수신 측 태스크가 이미 종료되었으면 false
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// 온라인 사용자 항목
#[derive(Debug, Clone)]
pub struct UserPresence {
    pub user_id: String,
    pub display_name: String,
    pub connection: ConnectionHandle,
    pub last_seen_at: DateTime<Utc>,
}

/// 등록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    New,
    /// 같은 연결로 다시 등록
    Refreshed,
    /// 이전 연결의 매핑을 밀어냄
    Replaced { stale: ConnectionId },
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: BTreeMap<String, UserPresence>,
    owners: HashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        user_id: &str,
        connection: ConnectionHandle,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Registration {
        // 같은 연결이 다른 사용자로 묶여 있었다면 그 매핑은 버린다
        if let Some(previous) = self.owners.get(&connection.id()) {
            if previous != user_id {
                let previous = previous.clone();
                self.users.remove(&previous);
            }
        }

        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.users.get(user_id).map(|p| p.display_name.clone()))
            .unwrap_or_else(|| user_id.to_string());

        let outcome = match self.users.get(user_id) {
            Some(existing) if existing.connection.id() == connection.id() => {
                Registration::Refreshed
            }
            Some(existing) => {
                let stale = existing.connection.id();
                self.owners.remove(&stale);
                Registration::Replaced { stale }
            }
            None => Registration::New,
        };

        self.owners.insert(connection.id(), user_id.to_string());
        self.users.insert(
            user_id.to_string(),
            UserPresence {
                user_id: user_id.to_string(),
                display_name,
                connection,
                last_seen_at: now,
            },
        );

        outcome
    }

    /// 없으면 조용히 None (로그아웃과 연결 종료의 경합은 정상)
    pub fn unregister(&mut self, user_id: &str) -> Option<UserPresence> {
        let presence = self.users.remove(user_id)?;
        let connection = presence.connection.id();
        if self.owners.get(&connection).map(String::as_str) == Some(user_id) {
            self.owners.remove(&connection);
        }
        Some(presence)
    }

    pub fn resolve(&self, user_id: &str) -> Option<&ConnectionHandle> {
        self.users.get(user_id).map(|p| &p.connection)
    }

    pub fn resolve_owner(&self, connection: ConnectionId) -> Option<&str> {
        self.owners.get(&connection).map(String::as_str)
    }

    pub fn get(&self, user_id: &str) -> Option<&UserPresence> {
        self.users.get(user_id)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// user_id 순으로 정렬된 온라인 목록
    pub fn snapshot(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    pub fn presences(&self) -> impl Iterator<Item = &UserPresence> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
