//! 환경 변수 기반 설정 관리

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// 하루
const MAX_RING_TIMEOUT_SECS: u64 = 86_400;
const MAX_HISTORY_CAPACITY: usize = 10_000;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub room: RoomConfig,
    pub call: CallConfig,
    pub log_level: String,
}

/// 방 설정
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// 메시 토폴로지라 참가자 수가 곧 연결 수의 제곱으로 늘어난다
    pub max_size: usize,
}

/// 통화 설정
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// 메모리에 보관하는 종료된 통화 기록 수
    pub history_capacity: usize,
    /// None이면 Ringing 상태를 서버가 만료시키지 않는다
    pub ring_timeout_secs: Option<u64>,
    /// 만료 스케줄러 주기
    pub sweep_interval_secs: u64,
    /// 설정 시 종료된 통화를 JSON Lines로 덧붙여 기록
    pub history_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            room: RoomConfig { max_size: 8 },
            call: CallConfig {
                history_capacity: 100,
                ring_timeout_secs: None,
                sweep_interval_secs: 1,
                history_path: None,
            },
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            port: env_or("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.cors_origins),
            room: RoomConfig {
                max_size: env_or("MAX_ROOM_SIZE", defaults.room.max_size).max(2),
            },
            call: CallConfig {
                history_capacity: env_or("CALL_HISTORY_CAPACITY", defaults.call.history_capacity)
                    .min(MAX_HISTORY_CAPACITY),
                ring_timeout_secs: env_opt("RING_TIMEOUT_SECS").and_then(valid_ring_timeout),
                sweep_interval_secs: env_or(
                    "SWEEP_INTERVAL_SECS",
                    defaults.call.sweep_interval_secs,
                )
                .max(1),
                history_path: env::var("CALL_HISTORY_PATH")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// CORS 허용 목록이 와일드카드인지 여부
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

/// 값이 없거나 파싱에 실패하면 기본값 사용
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).unwrap_or(default)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// 0이나 범위를 벗어난 값은 비활성으로 취급
fn valid_ring_timeout(secs: u64) -> Option<u64> {
    (1..=MAX_RING_TIMEOUT_SECS).contains(&secs).then_some(secs)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
