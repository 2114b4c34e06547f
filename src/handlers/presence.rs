//! 접속자 목록 브로드캐스트

use crate::protocol::ServerMessage;
use crate::state::ConnectionRegistry;

/// 현재 온라인 목록을 등록된 모든 연결에 전송
///
/// 레지스트리를 변경한 직후, 같은 락 안에서 정확히 한 번 호출한다.
pub fn publish(registry: &ConnectionRegistry) -> usize {
    let users = registry.snapshot();
    let mut delivered = 0;
    for presence in registry.presences() {
        if presence
            .connection
            .send(ServerMessage::OnlineUsers(users.clone()))
        {
            delivered += 1;
        }
    }

    tracing::debug!(online = users.len(), delivered = delivered, "Published presence");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionHandle;
    use chrono::Utc;
    use tokio::sync::mpsc;

    #[test]
    fn test_publish_reaches_every_registered_connection() {
        let mut registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register("alice", ConnectionHandle::new(tx_a), None, Utc::now());
        registry.register("bob", ConnectionHandle::new(tx_b), None, Utc::now());

        assert_eq!(publish(&registry), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerMessage::OnlineUsers(users) => {
                    assert_eq!(users, vec!["alice".to_string(), "bob".to_string()])
                }
                other => panic!("unexpected {:?}", other),
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_publish_skips_closed_connections() {
        let mut registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("alice", ConnectionHandle::new(tx), None, Utc::now());
        drop(rx);

        assert_eq!(publish(&registry), 0);
    }
}
