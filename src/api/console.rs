//! Console Session (C7): one WebSocket per session, bridging the Live Event
//! Bus and a following container log stream to the client, and inbound
//! commands back to the Server Instance.
//!
//! The fan-out/bridge shape — spawn once per session, forward events until
//! the socket closes — is the same one the teacher's `terminal_ws` uses for
//! its PTY sessions (`api/agents/terminal.rs`), generalized here from raw
//! PTY bytes to structured event frames.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::sandbox::instance::{LogStreamHandle, ServerInstance};
use crate::sandbox::types::{EventCategory, LiveEvent};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct ConsoleQuery {
    #[serde(rename = "serverId")]
    server_id: Option<String>,
    #[serde(rename = "userUuid")]
    user_uuid: Option<String>,
    #[serde(default)]
    tail: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
enum OutboundFrame {
    #[serde(rename = "line")]
    Line {
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        category: String,
        message: String,
        timestamp: DateTime<Utc>,
        line: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundFrame {
    #[serde(rename = "command")]
    Command { command: String },
}

pub async fn console_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConsoleQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state, query))
}

async fn handle_session(mut socket: WebSocket, state: Arc<AppState>, query: ConsoleQuery) {
    let (Some(server_id), Some(user_uuid)) = (query.server_id, query.user_uuid) else {
        send_error(&mut socket, "serverId and userUuid are required").await;
        let _ = socket.close().await;
        return;
    };

    let Some(instance) = state.registry.get(&server_id) else {
        send_error(&mut socket, "unknown server").await;
        let _ = socket.close().await;
        return;
    };

    if !state.remote.has_permission(&user_uuid, &server_id).await {
        send_error(&mut socket, "permission denied").await;
        let _ = socket.close().await;
        return;
    }

    let tail = query.tail.unwrap_or(200).clamp(0, 1000);
    let mut subscription = instance.events().subscribe();
    let mut current_log_stream: Option<LogStreamHandle> = None;

    let running = instance.get_status().await;
    if running {
        current_log_stream = Some(start_log_stream(&instance, tail));
    } else {
        send_line(&mut socket, EventCategory::Status, "desligado".to_string(), Utc::now()).await;
    }

    let mut supervisor_ticker = tokio::time::interval(SUPERVISOR_INTERVAL);
    let mut heartbeat_ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs = 0u32;
    let mut was_running = running;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundFrame>(&text) {
                            Ok(InboundFrame::Command { command }) => {
                                if let Err(e) = instance.send_command(&command).await {
                                    send_error(&mut socket, &e.to_string()).await;
                                }
                            }
                            Err(_) => send_error(&mut socket, "malformed frame").await,
                        }
                    }
                    Some(Ok(Message::Pong(_))) => { missed_pongs = 0; }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            Some(event) = subscription.receiver.recv() => {
                forward_event(&mut socket, event).await;
            }
            _ = supervisor_ticker.tick() => {
                let now_running = instance.get_status().await;
                if now_running && !was_running {
                    current_log_stream = Some(start_log_stream(&instance, tail));
                } else if !now_running && was_running {
                    if let Some(handle) = current_log_stream.take() {
                        handle.stop();
                    }
                }
                was_running = now_running;
            }
            _ = heartbeat_ticker.tick() => {
                missed_pongs += 1;
                if missed_pongs > 2 {
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(handle) = current_log_stream.take() {
        handle.stop();
    }
    instance.events().unsubscribe(subscription.id());
}

fn start_log_stream(instance: &Arc<ServerInstance>, tail: u32) -> LogStreamHandle {
    let events = instance.events();
    instance.stream_docker_logs(tail, move |_category, line| {
        events.emit(LiveEvent::new(EventCategory::Log, line));
    })
}

async fn forward_event(socket: &mut WebSocket, event: LiveEvent) {
    // `internal` events are consumed only in-process and never forwarded
    // (spec §3, §4.7).
    if matches!(event.category, EventCategory::Internal) {
        return;
    }
    send_line(socket, event.category, event.message, event.timestamp).await;
}

/// `{prefix-label, prefix-color, message-color}` used to compose the
/// colorized `line` for every category except `log`/`internal`, which send
/// `message` verbatim with no prefix (spec §4.7).
fn prefix_for(category: EventCategory) -> Option<(&'static str, &'static str, &'static str)> {
    match category {
        EventCategory::Status => Some(("STATUS", "\x1b[36m", "\x1b[0m")),
        EventCategory::Pull => Some(("PULL", "\x1b[34m", "\x1b[0m")),
        EventCategory::Error => Some(("ERROR", "\x1b[31m", "\x1b[31m")),
        EventCategory::Warn => Some(("WARN", "\x1b[33m", "\x1b[33m")),
        EventCategory::Command => Some(("CMD", "\x1b[35m", "\x1b[0m")),
        EventCategory::Log | EventCategory::Internal => None,
    }
}

fn category_label(category: EventCategory) -> &'static str {
    match category {
        EventCategory::Status => "status",
        EventCategory::Pull => "pull",
        EventCategory::Error => "error",
        EventCategory::Warn => "warn",
        EventCategory::Command => "command",
        EventCategory::Log => "log",
        EventCategory::Internal => "internal",
    }
}

async fn send_line(socket: &mut WebSocket, category: EventCategory, message: String, timestamp: DateTime<Utc>) {
    let reset = "\x1b[0m";
    let frame = match prefix_for(category) {
        None => OutboundFrame::Line {
            prefix: None,
            category: category_label(category).to_string(),
            message: message.clone(),
            timestamp,
            line: message,
        },
        Some((label, prefix_color, cat_color)) => {
            let line = format!("{prefix_color}{label}{reset} {cat_color}{message}{reset}");
            OutboundFrame::Line {
                prefix: Some(label.to_string()),
                category: category_label(category).to_string(),
                message,
                timestamp,
                line,
            }
        }
    };
    let _ = send_json(socket, &frame).await;
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let _ = send_json(socket, &OutboundFrame::Error { message: message.to_string() }).await;
}

async fn send_json(socket: &mut WebSocket, frame: &OutboundFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
