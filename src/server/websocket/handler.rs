//! WebSocket push channel.
//!
//! Each connection subscribes to the bus topics and forwards frames to the
//! client. Slow consumers lose the oldest frames (bus policy) and receive a
//! `lag_hint` frame telling them how many they missed.

use super::messages::{msg_types, ClientMessage, LagHint, ServerMessage};
use crate::server::state::ServerState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// Cap on a single frame write; a connection slower than this is dropped.
const WS_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    match tokio::time::timeout(WS_WRITE_TIMEOUT, sink.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    debug!("WebSocket client connected");
    let (mut sink, mut stream) = socket.split();

    let mut track_rx = state.bus.subscribe_track_changed();
    let mut history_rx = state.bus.subscribe_history_appended();
    let mut dj_rx = state.bus.subscribe_dj_state();

    // Greet with the current state so the client can render immediately.
    if send_frame(&mut sink, &ServerMessage::empty(msg_types::CONNECTED))
        .await
        .is_err()
    {
        return;
    }
    if let Some(snapshot) = state.snapshots.now() {
        if send_frame(
            &mut sink,
            &ServerMessage::new(msg_types::TRACK_UPDATE, &snapshot),
        )
        .await
        .is_err()
        {
            return;
        }
    }

    loop {
        let frame = tokio::select! {
            event = track_rx.recv() => match event {
                Ok(event) => ServerMessage::new(msg_types::TRACK_UPDATE, &event),
                Err(RecvError::Lagged(n)) => {
                    state.bus.note_dropped(n);
                    ServerMessage::new(msg_types::LAG_HINT, LagHint { dropped: n })
                }
                Err(RecvError::Closed) => break,
            },
            event = history_rx.recv() => match event {
                Ok(event) => ServerMessage::new(msg_types::HISTORY_UPDATE, &event),
                Err(RecvError::Lagged(n)) => {
                    state.bus.note_dropped(n);
                    ServerMessage::new(msg_types::LAG_HINT, LagHint { dropped: n })
                }
                Err(RecvError::Closed) => break,
            },
            event = dj_rx.recv() => match event {
                Ok(event) => ServerMessage::new(msg_types::DJ_STATE, &event),
                Err(RecvError::Lagged(n)) => {
                    state.bus.note_dropped(n);
                    ServerMessage::new(msg_types::LAG_HINT, LagHint { dropped: n })
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) if msg.msg_type == msg_types::PING => {
                            ServerMessage::empty(msg_types::PONG)
                        }
                        Ok(msg) => {
                            debug!(msg_type = %msg.msg_type, "Ignoring client frame");
                            continue;
                        }
                        Err(e) => {
                            debug!(error = %e, "Unparseable client frame");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            },
        };

        if send_frame(&mut sink, &frame).await.is_err() {
            break;
        }
    }
    debug!("WebSocket client disconnected");
}
