//! 1:1 통화 세션 상태 머신
//!
//! `Ringing -> Connected -> Ended` 또는 `Ringing -> Ended`.
//! 사용자마다 Ringing/Connected 세션은 최대 하나이며, 통화 중 판정은 항상 활성 인덱스 기준이다.
//! 종료된 세션은 불변 기록이 되어 고정 크기 링 버퍼에 쌓인다.

use crate::error::SignalError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// 순서와 무관한 통화 당사자 쌍
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    low: String,
    high: String,
}

impl CallKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            Self {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Ringing,
    Connected,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Completed,
    Missed,
    Declined,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub call_id: Uuid,
    pub caller_id: String,
    pub callee_id: String,
    pub caller_name: String,
    pub callee_name: String,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub outcome: Option<CallOutcome>,
}

impl CallSession {
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.caller_id == user_id {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }

    fn finish(mut self, outcome: CallOutcome, now: DateTime<Utc>) -> Self {
        let duration = self
            .connected_at
            .map(|connected| (now - connected).num_seconds().max(0))
            .unwrap_or(0);
        self.state = CallState::Ended;
        self.ended_at = Some(now);
        self.duration_seconds = Some(duration);
        self.outcome = Some(outcome);
        self
    }
}

pub struct CallSessionManager {
    active: HashMap<CallKey, CallSession>,
    by_user: HashMap<String, CallKey>,
    history: VecDeque<CallSession>,
    history_capacity: usize,
}

impl CallSessionManager {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            by_user: HashMap::new(),
            history: VecDeque::new(),
            history_capacity,
        }
    }

    pub fn is_busy(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// 호출 가능 여부(온라인 확인은 호출자 몫)를 검사하고 Ringing 세션 생성
    pub fn initiate(
        &mut self,
        caller_id: &str,
        callee_id: &str,
        caller_name: &str,
        callee_name: &str,
        now: DateTime<Utc>,
    ) -> Result<&CallSession, SignalError> {
        if caller_id == callee_id {
            return Err(SignalError::SelfCall);
        }
        if self.is_busy(callee_id) {
            return Err(SignalError::Busy(callee_id.to_string()));
        }
        if self.is_busy(caller_id) {
            return Err(SignalError::AlreadyInCall);
        }

        let key = CallKey::new(caller_id, callee_id);
        let session = CallSession {
            call_id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            caller_name: caller_name.to_string(),
            callee_name: callee_name.to_string(),
            state: CallState::Ringing,
            started_at: now,
            connected_at: None,
            ended_at: None,
            duration_seconds: None,
            outcome: None,
        };

        self.by_user.insert(caller_id.to_string(), key.clone());
        self.by_user.insert(callee_id.to_string(), key.clone());
        Ok(&*self.active.entry(key).or_insert(session))
    }

    /// 수신자만 자신에게 걸려 온 Ringing 세션을 수락할 수 있다
    pub fn accept(
        &mut self,
        callee_id: &str,
        caller_id: &str,
        now: DateTime<Utc>,
    ) -> Result<&CallSession, SignalError> {
        let key = CallKey::new(caller_id, callee_id);
        match self.active.get_mut(&key) {
            Some(session)
                if session.state == CallState::Ringing && session.callee_id == callee_id =>
            {
                session.state = CallState::Connected;
                session.connected_at = Some(now);
                Ok(&*session)
            }
            _ => Err(SignalError::StaleSignal(caller_id.to_string())),
        }
    }

    pub fn decline(
        &mut self,
        callee_id: &str,
        caller_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CallSession, SignalError> {
        let key = CallKey::new(caller_id, callee_id);
        let pending = self
            .active
            .get(&key)
            .map(|s| s.state == CallState::Ringing && s.callee_id == callee_id)
            .unwrap_or(false);
        if !pending {
            return Err(SignalError::StaleSignal(caller_id.to_string()));
        }
        self.finish(&key, CallOutcome::Declined, now)
            .ok_or_else(|| SignalError::StaleSignal(caller_id.to_string()))
    }

    /// 연결된 적이 있으면 Completed, 아니면 Failed
    pub fn end(&mut self, user_id: &str, peer_id: &str, now: DateTime<Utc>) -> Option<CallSession> {
        let key = CallKey::new(user_id, peer_id);
        let outcome = match self.active.get(&key)?.state {
            CallState::Connected => CallOutcome::Completed,
            _ => CallOutcome::Failed,
        };
        self.finish(&key, outcome, now)
    }

    /// 연결 종료 시 해당 사용자의 활성 세션을 Failed로 종료
    pub fn abort_for(&mut self, user_id: &str, now: DateTime<Utc>) -> Option<CallSession> {
        let key = self.by_user.get(user_id)?.clone();
        self.finish(&key, CallOutcome::Failed, now)
    }

    /// `deadline` 이전에 시작된 Ringing 세션을 Missed로 종료
    pub fn expire_ringing(&mut self, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Vec<CallSession> {
        let expired: Vec<CallKey> = self
            .active
            .iter()
            .filter(|(_, s)| s.state == CallState::Ringing && s.started_at <= deadline)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .iter()
            .filter_map(|key| self.finish(key, CallOutcome::Missed, now))
            .collect()
    }

    pub fn active_sessions(&self) -> Vec<CallSession> {
        let mut sessions: Vec<CallSession> = self.active.values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// 오래된 순
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &CallSession> {
        self.history.iter()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn finish(&mut self, key: &CallKey, outcome: CallOutcome, now: DateTime<Utc>) -> Option<CallSession> {
        let session = self.active.remove(key)?;
        for user_id in [&session.caller_id, &session.callee_id] {
            if self.by_user.get(user_id.as_str()) == Some(key) {
                self.by_user.remove(user_id.as_str());
            }
        }

        let record = session.finish(outcome, now);
        if self.history_capacity > 0 {
            if self.history.len() == self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(record.clone());
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn manager() -> CallSessionManager {
        CallSessionManager::new(10)
    }

    #[test]
    fn test_call_key_is_order_independent() {
        assert_eq!(CallKey::new("alice", "bob"), CallKey::new("bob", "alice"));
        assert_ne!(CallKey::new("alice", "bob"), CallKey::new("alice", "carol"));
    }

    #[test]
    fn test_initiate_accept_end_completes() {
        let mut calls = manager();
        let start = Utc::now();

        let call_id = calls
            .initiate("alice", "bob", "Alice", "Bob", start)
            .unwrap()
            .call_id;
        assert!(calls.is_busy("alice"));
        assert!(calls.is_busy("bob"));

        let session = calls.accept("bob", "alice", start + Duration::seconds(2)).unwrap();
        assert_eq!(session.state, CallState::Connected);
        assert_eq!(session.call_id, call_id);

        let record = calls.end("alice", "bob", start + Duration::seconds(32)).unwrap();
        assert_eq!(record.outcome, Some(CallOutcome::Completed));
        assert_eq!(record.duration_seconds, Some(30));
        assert_eq!(record.state, CallState::Ended);

        assert!(!calls.is_busy("alice"));
        assert!(!calls.is_busy("bob"));
        assert_eq!(calls.history().count(), 1);
        assert_eq!(calls.active_count(), 0);
    }

    #[test]
    fn test_decline_records_without_connected_at() {
        let mut calls = manager();
        calls.initiate("alice", "bob", "Alice", "Bob", Utc::now()).unwrap();

        let record = calls.decline("bob", "alice", Utc::now()).unwrap();
        assert_eq!(record.outcome, Some(CallOutcome::Declined));
        assert!(record.connected_at.is_none());
        assert_eq!(record.duration_seconds, Some(0));

        let history: Vec<_> = calls.history().collect();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Some(CallOutcome::Declined));
    }

    #[test]
    fn test_busy_callee_rejects_any_caller() {
        let mut calls = manager();
        calls.initiate("alice", "bob", "Alice", "Bob", Utc::now()).unwrap();

        let err = calls.initiate("carol", "bob", "Carol", "Bob", Utc::now()).unwrap_err();
        assert_eq!(err, SignalError::Busy("bob".to_string()));

        // 발신자 역시 통화 중으로 취급
        let err = calls.initiate("carol", "alice", "Carol", "Alice", Utc::now()).unwrap_err();
        assert_eq!(err, SignalError::Busy("alice".to_string()));

        calls.accept("bob", "alice", Utc::now()).unwrap();
        let err = calls.initiate("carol", "bob", "Carol", "Bob", Utc::now()).unwrap_err();
        assert_eq!(err, SignalError::Busy("bob".to_string()));
        assert_eq!(calls.active_count(), 1);
    }

    #[test]
    fn test_caller_already_in_call_and_self_call() {
        let mut calls = manager();
        calls.initiate("alice", "bob", "Alice", "Bob", Utc::now()).unwrap();

        let err = calls.initiate("alice", "carol", "Alice", "Carol", Utc::now()).unwrap_err();
        assert_eq!(err, SignalError::AlreadyInCall);

        let err = calls.initiate("dave", "dave", "Dave", "Dave", Utc::now()).unwrap_err();
        assert_eq!(err, SignalError::SelfCall);
    }

    #[test]
    fn test_stale_accept_and_decline() {
        let mut calls = manager();
        assert_eq!(
            calls.accept("bob", "alice", Utc::now()).unwrap_err(),
            SignalError::StaleSignal("alice".to_string())
        );

        calls.initiate("alice", "bob", "Alice", "Bob", Utc::now()).unwrap();
        // 발신자가 자기 통화를 수락할 수는 없다
        assert!(calls.accept("alice", "bob", Utc::now()).is_err());

        calls.accept("bob", "alice", Utc::now()).unwrap();
        // 중복 수락, 연결 후 거절
        assert!(calls.accept("bob", "alice", Utc::now()).is_err());
        assert!(calls.decline("bob", "alice", Utc::now()).is_err());
        assert_eq!(calls.active_count(), 1);
    }

    #[test]
    fn test_end_before_connect_is_failed() {
        let mut calls = manager();
        calls.initiate("alice", "bob", "Alice", "Bob", Utc::now()).unwrap();

        let record = calls.end("alice", "bob", Utc::now()).unwrap();
        assert_eq!(record.outcome, Some(CallOutcome::Failed));
        assert_eq!(record.duration_seconds, Some(0));
        assert!(calls.end("alice", "bob", Utc::now()).is_none());
    }

    #[test]
    fn test_abort_for_disconnected_user() {
        let mut calls = manager();
        calls.initiate("alice", "bob", "Alice", "Bob", Utc::now()).unwrap();
        calls.accept("bob", "alice", Utc::now()).unwrap();

        let record = calls.abort_for("bob", Utc::now()).unwrap();
        assert_eq!(record.outcome, Some(CallOutcome::Failed));
        assert!(record.connected_at.is_some());
        assert!(calls.abort_for("bob", Utc::now()).is_none());

        // 양쪽 모두 다시 통화 가능
        assert!(calls.initiate("carol", "alice", "Carol", "Alice", Utc::now()).is_ok());
        assert!(calls.initiate("bob", "dave", "Bob", "Dave", Utc::now()).is_ok());
    }

    #[test]
    fn test_expire_ringing_marks_missed() {
        let mut calls = manager();
        let start = Utc::now();
        calls.initiate("alice", "bob", "Alice", "Bob", start).unwrap();
        calls.initiate("carol", "dave", "Carol", "Dave", start + Duration::seconds(20)).unwrap();
        calls.accept("dave", "carol", start + Duration::seconds(21)).unwrap();

        let expired = calls.expire_ringing(start + Duration::seconds(10), start + Duration::seconds(40));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].caller_id, "alice");
        assert_eq!(expired[0].outcome, Some(CallOutcome::Missed));
        assert!(calls.is_busy("carol"));
        assert!(!calls.is_busy("alice"));
    }

    #[test]
    fn test_history_ring_evicts_oldest() {
        let mut calls = CallSessionManager::new(2);
        for callee in ["b1", "b2", "b3"] {
            calls.initiate("alice", callee, "Alice", callee, Utc::now()).unwrap();
            calls.end("alice", callee, Utc::now()).unwrap();
        }

        let callees: Vec<_> = calls.history().map(|r| r.callee_id.as_str()).collect();
        assert_eq!(callees, vec!["b2", "b3"]);
    }
}
