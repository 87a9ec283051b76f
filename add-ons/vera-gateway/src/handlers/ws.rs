//! `/chat/ws/chat`: bridges a websocket to a [`ChatChannel`].
//!
//! A reader task forwards text frames and flags the peer as gone on close or
//! error, so an in-flight answer can be abandoned without waiting for it.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use vera_core::{ChatChannel, ChatOrchestrator, Disconnected, EventSink, OutboundEvent};

use crate::state::AppState;

/// Frames queued while an answer is in flight; beyond this the reader stops
/// pulling from the socket.
const INBOUND_FRAME_BUFFER: usize = 16;

pub async fn ws_chat(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let chat = state.chat.clone();
    ws.on_upgrade(move |socket| run_socket(socket, chat))
}

struct WsEventSink {
    sender: SplitSink<WebSocket, WsMessage>,
    closed: watch::Receiver<bool>,
}

#[async_trait::async_trait]
impl EventSink for WsEventSink {
    async fn emit(&mut self, event: OutboundEvent) -> Result<(), Disconnected> {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(target: "vera::ws", error = %e, "Could not encode event");
                return Ok(());
            }
        };
        self.sender.send(WsMessage::Text(text)).await.map_err(|_| Disconnected)
    }

    async fn closed(&mut self) {
        loop {
            if *self.closed.borrow() {
                return;
            }
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Feeds text frames to `frames` until the peer closes, then raises `closed`.
/// A full `frames` buffer stalls reading from the peer.
async fn forward_frames<R>(mut receiver: R, frames: mpsc::Sender<String>, closed: watch::Sender<bool>)
where
    R: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                if frames.send(text).await.is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let _ = closed.send(true);
}

async fn run_socket(socket: WebSocket, chat: ChatOrchestrator) {
    let (sender, receiver) = socket.split();
    let (closed_tx, closed_rx) = watch::channel(false);
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(INBOUND_FRAME_BUFFER);

    let reader = tokio::spawn(forward_frames(receiver, frame_tx, closed_tx));

    tracing::info!(target: "vera::ws", "WebSocket connected");
    let mut sink = WsEventSink {
        sender,
        closed: closed_rx,
    };
    let mut channel = ChatChannel::new(chat);
    while let Some(text) = frame_rx.recv().await {
        if channel.handle_text(&text, &mut sink).await.is_err() {
            break;
        }
    }
    channel.close();
    reader.abort();
    tracing::info!(target: "vera::ws", "WebSocket disconnected");
}
