//! 접속 현황 · 통화 시그널링 서버

mod api;
mod config;
mod error;
mod handlers;
mod history;
mod protocol;
mod state;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderValue,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use config::Config;
use futures::{SinkExt, StreamExt};
use history::HistoryRecorder;
use protocol::{ClientMessage, ServerMessage};
use state::AppState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let history = match &config.call.history_path {
        Some(path) => HistoryRecorder::spawn_file_writer(path.clone()),
        None => HistoryRecorder::disabled(),
    };
    let state = Arc::new(AppState::with_history(config.clone(), history));

    // 응답 없는 통화 만료 스케줄러
    if let Some(timeout) = config.call.ring_timeout_secs {
        tracing::info!(ring_timeout_secs = timeout, "Ring timeout enabled");
        let sweep_state = state.clone();
        let period = config.call.sweep_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(period));
            loop {
                interval.tick().await;
                handlers::expire_unanswered_calls(&sweep_state).await;
            }
        });
    }

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .merge(api::routes())
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Presence signaling server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>Presence Signaling Server</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let core = state.core.lock().await;
    Json(serde_json::json!({
        "status": "ok",
        "server": "presence-signaling-rs",
        "connections": state.peers.len(),
        "onlineUsers": core.registry.len(),
        "activeCalls": core.calls.active_count(),
        "rooms": core.rooms.len(),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 연결 처리
    let connection = handlers::handle_connection(&state, tx).await;
    let connection_id = connection.id();

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(connection = %connection_id, error = %e, "Failed to serialize server message");
                }
            }
        }
    });

    // 수신 처리 (연결별 도착 순서 유지)
    let recv_state = state.clone();
    let session = async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => handlers::handle_client_message(&recv_state, &connection, msg).await,
                    Err(e) => {
                        tracing::warn!(connection = %connection_id, error = %e, "Dropped malformed client message");
                    }
                },
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!(connection = %connection_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    };

    // 연결 해제 (수신 루프가 패닉으로 끝나도 실행)
    handlers::supervise_connection(state, connection_id, session).await;
    send_task.abort();
}
