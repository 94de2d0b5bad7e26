use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use procmgr_runner::{FrameSink, Hub, SendError, Subscribe};

use crate::daemon::AppState;

pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsSink {
	async fn send(&mut self, frame: String) -> Result<(), SendError> {
		self.0
			.send(Message::Text(frame.into()))
			.await
			.map_err(|e| SendError(e.to_string()))
	}

	async fn close(&mut self) {
		let _ = self.0.close().await;
	}
}

/// One observer: the hub owns the write half, this task drains the read half for
/// subscribe requests until the client goes away.
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
	let (sink, mut stream) = socket.split();
	let id = match hub.connect(Box::new(WsSink(sink))).await {
		Ok(id) => id,
		Err(e) => {
			tracing::warn!("websocket closed before the first snapshot: {}", e);
			return;
		}
	};

	while let Some(message) = stream.next().await {
		let text = match message {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(e) => {
				tracing::debug!("session {}: read failed: {}", id, e);
				break;
			}
		};

		let request: Subscribe = match serde_json::from_str(text.as_str()) {
			Ok(r) => r,
			Err(e) => {
				tracing::warn!("session {}: ignoring malformed request: {}", id, e);
				continue;
			}
		};

		if let Err(e) = hub.subscribe(id, request).await {
			tracing::warn!("session {}: {}", id, e);
			break;
		}
	}

	hub.disconnect(id).await;
}
