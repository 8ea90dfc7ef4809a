//! Local-mode subscriptions over Server-Sent Events and WebSocket.

use std::convert::Infallible;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::AppState;
use crate::realtime::Subscription;

/// GET /api/realtime/{topic}
pub async fn sse_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.fanout.hub().subscribe(&topic);
    info!(topic = %topic, "SSE subscriber connected");
    let stream = subscription.map(|text| Ok(Event::default().data(text)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /ws/realtime/{topic}
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> impl IntoResponse {
    let subscription = state.fanout.hub().subscribe(&topic);
    ws.on_upgrade(move |socket| handle_socket(socket, subscription))
}

async fn handle_socket(mut socket: WebSocket, mut subscription: Subscription) {
    info!(topic = %subscription.topic(), "WebSocket subscriber connected");

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                match frame {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    None => {
                        debug!("Subscription dropped by hub");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(topic = %subscription.topic(), "WebSocket subscriber closed");
}
