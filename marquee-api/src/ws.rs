use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use marquee_domain::events::WsClientMessage;

use crate::hub::{Hub, Subscriber};
use crate::state::AppState;

const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
/// 90% of the pong window, so a healthy peer always answers in time.
const PING_PERIOD: Duration = Duration::from_secs(54);
const MAX_MESSAGE_SIZE: usize = 512;

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = query.session_id.unwrap_or_else(|| "default".to_string());
    let user_id = query.user_id.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| handle_connection(socket, state.hub.clone(), session_id, user_id))
}

async fn handle_connection(socket: WebSocket, hub: Hub, session_id: String, user_id: String) {
    let (ws_tx, ws_rx) = socket.split();
    let (subscriber, outbound) = Subscriber::new(&user_id);
    hub.register(&session_id, subscriber.clone());

    let writer = tokio::spawn(write_pump(ws_tx, outbound, subscriber.clone()));

    let final_session = read_pump(ws_rx, &hub, &subscriber, session_id).await;

    hub.unregister(&final_session, subscriber.id);
    let _ = writer.await;
}

/// Reads inbound frames under the pong deadline: every received frame
/// (including transport pongs) pushes the deadline forward.
async fn read_pump(
    mut ws_rx: SplitStream<WebSocket>,
    hub: &Hub,
    subscriber: &Subscriber,
    mut session_id: String,
) -> String {
    loop {
        let msg = tokio::select! {
            _ = subscriber.cancelled() => break,
            received = tokio::time::timeout(PONG_WAIT, ws_rx.next()) => match received {
                Err(_) => {
                    debug!("Read deadline expired: user={}", subscriber.user_id);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!("WebSocket error: {}", err);
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            },
        };

        match msg {
            Message::Text(text) => {
                if text.len() > MAX_MESSAGE_SIZE {
                    warn!("Closing subscriber {} on oversized frame", subscriber.user_id);
                    break;
                }
                handle_client_message(hub, subscriber, &mut session_id, &text);
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
    session_id
}

fn handle_client_message(
    hub: &Hub,
    subscriber: &Subscriber,
    session_id: &mut String,
    text: &str,
) {
    let parsed: WsClientMessage = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("Error parsing message: {}", err);
            return;
        }
    };

    match parsed {
        WsClientMessage::Ping => {
            subscriber.send_frame(r#"{"type":"PONG"}"#.to_string());
        }
        WsClientMessage::Subscribe { session_id: target } => {
            // Re-subscribing to the current session is a no-op.
            if *session_id != target {
                hub.switch_session(session_id, &target, subscriber.clone());
                info!(
                    "Client changed session: user={}, newSession={}",
                    subscriber.user_id, target
                );
                *session_id = target;
            }
        }
        WsClientMessage::Unknown => {}
    }
}

/// Drains the outbound buffer onto the socket, coalescing the queued backlog
/// into one newline-separated frame, and keeps the peer alive with pings.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: tokio::sync::mpsc::Receiver<String>,
    subscriber: Subscriber,
) {
    let start = tokio::time::Instant::now() + PING_PERIOD;
    let mut ping = tokio::time::interval_at(start, PING_PERIOD);

    loop {
        tokio::select! {
            _ = subscriber.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            maybe = outbound.recv() => {
                let Some(mut frame) = maybe else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                while let Ok(next) = outbound.try_recv() {
                    frame.push('\n');
                    frame.push_str(&next);
                }
                match tokio::time::timeout(WRITE_WAIT, ws_tx.send(Message::Text(frame))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            _ = ping.tick() => {
                match tokio::time::timeout(WRITE_WAIT, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}
