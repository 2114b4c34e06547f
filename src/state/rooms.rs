//! 그룹 통화 방
//!
//! 방은 참가자 소개만 중계하고 미디어는 참가자끼리 직접 연결한다(메시).
//! 참가자는 user_id 기준으로 유일하며, 마지막 참가자가 나가면 방은 즉시 삭제된다.

use crate::error::SignalError;
use crate::protocol::ParticipantInfo;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub profile_pic: Option<String>,
}

impl Participant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.user_id.clone(),
            username: self.display_name.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    /// 입장 순서
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn contains(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant_infos(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(Participant::info).collect()
    }
}

/// 입장 결과
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// 입장 직전의 참가자 (새 참가자 알림 대상)
    pub existing: Vec<Participant>,
    pub participants: Vec<Participant>,
}

/// 퇴장 결과
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub room_id: String,
    pub remaining: Vec<Participant>,
    pub room_deleted: bool,
}

pub struct RoomManager {
    rooms: HashMap<String, Room>,
    max_size: usize,
}

impl RoomManager {
    pub fn new(max_size: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            max_size,
        }
    }

    pub fn create_room(
        &mut self,
        room_id: &str,
        creator: Participant,
        now: DateTime<Utc>,
    ) -> Result<&Room, SignalError> {
        if self.rooms.contains_key(room_id) {
            return Err(SignalError::RoomExists(room_id.to_string()));
        }

        let room = Room {
            room_id: room_id.to_string(),
            participants: vec![creator],
            created_at: now,
        };
        Ok(&*self.rooms.entry(room_id.to_string()).or_insert(room))
    }

    pub fn join_room(
        &mut self,
        room_id: &str,
        participant: Participant,
    ) -> Result<JoinOutcome, SignalError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| SignalError::RoomNotFound(room_id.to_string()))?;

        if room.contains(&participant.user_id) {
            return Err(SignalError::AlreadyInRoom(room_id.to_string()));
        }
        if room.participants.len() >= self.max_size {
            return Err(SignalError::RoomFull(room_id.to_string()));
        }

        let existing = room.participants.clone();
        room.participants.push(participant);

        Ok(JoinOutcome {
            existing,
            participants: room.participants.clone(),
        })
    }

    /// 참가자가 아니면 None
    pub fn leave_room(&mut self, room_id: &str, user_id: &str) -> Option<LeaveOutcome> {
        let room = self.rooms.get_mut(room_id)?;
        let position = room.participants.iter().position(|p| p.user_id == user_id)?;
        room.participants.remove(position);

        let remaining = room.participants.clone();
        let room_deleted = remaining.is_empty();
        if room_deleted {
            self.rooms.remove(room_id);
        }

        Some(LeaveOutcome {
            room_id: room_id.to_string(),
            remaining,
            room_deleted,
        })
    }

    /// 사용자가 속한 모든 방에서 제거 (정상적으로는 최대 하나)
    pub fn remove_everywhere(&mut self, user_id: &str) -> Vec<LeaveOutcome> {
        self.rooms_of(user_id)
            .iter()
            .filter_map(|room_id| self.leave_room(room_id, user_id))
            .collect()
    }

    pub fn rooms_of(&self, user_id: &str) -> Vec<String> {
        let mut room_ids: Vec<String> = self
            .rooms
            .values()
            .filter(|room| room.contains(user_id))
            .map(|room| room.room_id.clone())
            .collect();
        room_ids.sort();
        room_ids
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.values().cloned().collect();
        rooms.sort_by_key(|room| room.created_at);
        rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }
}
