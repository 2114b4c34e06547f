//! 종료된 통화 기록의 비동기 저장
//!
//! 기록은 채널로 넘기고 백그라운드 태스크가 JSON Lines 파일에 덧붙인다.
//! 저장 실패는 로그만 남기며 통화 상태나 상대방 알림에 영향을 주지 않는다.

use crate::state::CallSession;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Default)]
pub struct HistoryRecorder {
    sender: Option<UnboundedSender<CallSession>>,
}

impl HistoryRecorder {
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// 호출 측에서 직접 수신하는 기록기 (임베딩/테스트용)
    pub fn channel() -> (Self, UnboundedReceiver<CallSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// 파일 기록 태스크 시작. tokio 런타임 안에서 호출해야 한다.
    pub fn spawn_file_writer(path: PathBuf) -> Self {
        let (recorder, rx) = Self::channel();
        tokio::spawn(write_records(path, rx));
        recorder
    }

    /// 블로킹하지 않는다
    pub fn persist(&self, record: &CallSession) {
        if let Some(sender) = &self.sender {
            if sender.send(record.clone()).is_err() {
                tracing::warn!(call_id = %record.call_id, "History writer is gone, record dropped");
            }
        }
    }
}

async fn write_records(path: PathBuf, mut rx: UnboundedReceiver<CallSession>) {
    let mut file = match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to open call history file");
            // 채널은 계속 비워 송신 측이 쌓이지 않게 한다
            while rx.recv().await.is_some() {}
            return;
        }
    };

    tracing::info!(path = %path.display(), "Call history persistence enabled");

    while let Some(record) = rx.recv().await {
        let mut line = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(call_id = %record.call_id, error = %e, "Failed to serialize call record");
                continue;
            }
        };
        line.push('\n');

        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            tracing::warn!(call_id = %record.call_id, error = %e, "Failed to persist call record");
        }
    }
}
