//! Live-log relay.
//!
//! One cooperative task per client connection: replay the backlog as a
//! single message, then forward live messages until the channel key
//! vanishes or the client departs. The relay never writes to the bus.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use kozmic_bus::Bus;

use crate::AppState;

/// Keepalive period; also bounds how quickly a deleted channel key is
/// noticed.
const KEEPALIVE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct Frame<'a> {
    r#type: &'a str,
    content: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if channel.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let bus = state.bus.clone();
    ws.on_upgrade(move |socket| relay(socket, bus, channel))
}

async fn relay(socket: WebSocket, bus: Arc<dyn Bus>, channel: String) {
    info!(channel = %channel, "log relay connected");
    let (mut sender, mut receiver) = socket.split();

    // Replay the backlog as one message.
    let backlog = match bus.range(&channel).await {
        Ok(lines) => lines.concat(),
        Err(e) => {
            warn!(channel = %channel, error = %e, "failed to read the backlog");
            return;
        }
    };
    if send_frame(&mut sender, "message", backlog).await.is_err() {
        return;
    }

    let mut subscription = match bus.subscribe(&channel).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(channel = %channel, error = %e, "failed to subscribe");
            return;
        }
    };

    loop {
        tokio::select! {
            message = subscription.next() => match message {
                Some(line) => {
                    if send_frame(&mut sender, "message", line).await.is_err() {
                        break;
                    }
                }
                None => {
                    // The topic is gone; tell the client if the job is over.
                    if let Ok(false) = bus.exists(&channel).await {
                        let _ = send_frame(&mut sender, "status", "finished".into()).await;
                    }
                    break;
                }
            },

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!(channel = %channel, "log relay client departed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(channel = %channel, error = %e, "log relay socket error");
                    break;
                }
                _ => {}
            },

            _ = sleep(KEEPALIVE) => {
                // Probe the client, then check whether the build is still
                // ongoing.
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                match bus.exists(&channel).await {
                    Ok(true) => {}
                    Ok(false) => {
                        let _ = send_frame(&mut sender, "status", "finished".into()).await;
                        break;
                    }
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "failed to check the channel");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    r#type: &str,
    content: String,
) -> Result<(), ()> {
    let frame = Frame { r#type, content };
    let Ok(json) = serde_json::to_string(&frame) else {
        return Err(());
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_serialize_to_the_wire_format() {
        let message = Frame {
            r#type: "message",
            content: "hello\n".into(),
        };
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"type":"message","content":"hello\n"}"#
        );

        let status = Frame {
            r#type: "status",
            content: "finished".into(),
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"type":"status","content":"finished"}"#
        );
    }
}
