//! Live fan-out of server state and logs to connected observers.
//!
//! Every observer gets a session holding what it follows and how far it has read.
//! On each state change the hub pushes a fresh server list to every session and,
//! for sessions following a server, whatever log entries they have not seen yet.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::bus::StateChanges;
use crate::supervisor::Supervisor;
use crate::types::{Push, Subscribe};

/// Minimum spacing between two broadcasts.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(100);

/// A client that takes longer than this to accept one frame is dropped.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub type SessionId = u64;

#[derive(Debug, thiserror::Error)]
#[error("send failed: {0}")]
pub struct SendError(pub String);

/// Outgoing half of an observer connection.
#[async_trait]
pub trait FrameSink: Send {
	async fn send(&mut self, frame: String) -> Result<(), SendError>;
	async fn close(&mut self);
}

struct Session {
	// Doubles as the per-connection send lock: cursor changes and writes to the
	// sink only happen while it is held.
	state: Mutex<SessionState>,
}

struct SessionState {
	sink: Box<dyn FrameSink>,
	subscription: Option<String>,
	/// Entries of `subscription` the client has confirmed receiving.
	offset: usize,
}

pub struct Hub {
	supervisor: Arc<Supervisor>,
	sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
	next_id: AtomicU64,
}

impl Hub {
	pub fn new(supervisor: Arc<Supervisor>) -> Arc<Self> {
		Arc::new(Self {
			supervisor,
			sessions: RwLock::new(HashMap::new()),
			next_id: AtomicU64::new(1),
		})
	}

	/// Register a new observer and send it the current server list.
	pub async fn connect(&self, sink: Box<dyn FrameSink>) -> Result<SessionId, SendError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let session = Arc::new(Session {
			state: Mutex::new(SessionState {
				sink,
				subscription: None,
				offset: 0,
			}),
		});
		self.sessions.write().await.insert(id, Arc::clone(&session));
		tracing::debug!("session {} connected", id);

		let result = match self.snapshot_frame().await {
			Ok(frame) => {
				let mut state = session.state.lock().await;
				send(&mut state, frame).await
			}
			Err(e) => Err(e),
		};

		match result {
			Ok(()) => Ok(id),
			Err(e) => {
				self.disconnect(id).await;
				Err(e)
			}
		}
	}

	/// Point a session at `request.name`, resuming after `request.offset` entries,
	/// and send whatever is available from there right away.
	pub async fn subscribe(&self, id: SessionId, request: Subscribe) -> Result<(), SendError> {
		let Some(session) = self.session(id).await else {
			return Ok(());
		};

		let result = {
			let mut state = session.state.lock().await;
			tracing::debug!("session {} follows {} from {}", id, request.name, request.offset);
			state.subscription = Some(request.name);
			state.offset = request.offset;
			self.push_page(&mut state).await.map(|_| ())
		};

		if result.is_err() {
			self.disconnect(id).await;
		}
		result
	}

	/// Push the server list, and any unseen log entries, to every session. Sessions
	/// that fail to take a frame are dropped with their offset where it was, so a
	/// client resuming from its own count gets the same page again.
	pub async fn broadcast(&self) {
		let sessions: Vec<(SessionId, Arc<Session>)> = self
			.sessions
			.read()
			.await
			.iter()
			.map(|(id, session)| (*id, Arc::clone(session)))
			.collect();
		if sessions.is_empty() {
			return;
		}

		let frame = match self.snapshot_frame().await {
			Ok(f) => f,
			Err(e) => {
				tracing::error!("failed to encode snapshot: {}", e);
				return;
			}
		};

		let results = futures::future::join_all(sessions.iter().map(|(id, session)| {
			let frame = frame.clone();
			async move { (*id, self.deliver(session, frame).await) }
		}))
		.await;

		for (id, result) in results {
			if let Err(e) = result {
				tracing::warn!("session {}: {}, dropping it", id, e);
				self.disconnect(id).await;
			}
		}
	}

	/// Forget a session and close its sink. Safe to call more than once.
	pub async fn disconnect(&self, id: SessionId) {
		let removed = self.sessions.write().await.remove(&id);
		if let Some(session) = removed {
			session.state.lock().await.sink.close().await;
			tracing::debug!("session {} disconnected", id);
		}
	}

	/// Broadcast on every state change, at most once per [`BROADCAST_INTERVAL`].
	///
	/// Changes that land while a window is open fold into the one pending signal, so
	/// the next push shows current state rather than replaying each event.
	pub async fn run(self: Arc<Self>, mut changes: StateChanges) {
		while changes.changed().await {
			let window_end = Instant::now() + BROADCAST_INTERVAL;
			self.broadcast().await;
			tokio::time::sleep_until(window_end).await;
		}
		tracing::debug!("state bus closed, broadcast loop finished");
	}

	pub async fn session_count(&self) -> usize {
		self.sessions.read().await.len()
	}

	/// What a session follows and how far it has read.
	pub async fn cursor(&self, id: SessionId) -> Option<(Option<String>, usize)> {
		let session = self.session(id).await?;
		let state = session.state.lock().await;
		Some((state.subscription.clone(), state.offset))
	}

	async fn session(&self, id: SessionId) -> Option<Arc<Session>> {
		self.sessions.read().await.get(&id).cloned()
	}

	async fn deliver(&self, session: &Session, snapshot: String) -> Result<(), SendError> {
		let mut state = session.state.lock().await;
		send(&mut state, snapshot).await?;
		self.push_page(&mut state).await?;
		Ok(())
	}

	/// Send the page at the session's offset, if there is one, and move the offset
	/// past it once the sink has accepted it.
	async fn push_page(&self, state: &mut SessionState) -> Result<usize, SendError> {
		let Some(name) = state.subscription.as_deref() else {
			return Ok(0);
		};
		let page = self.supervisor.log_page(name, state.offset).await;
		if page.logs.is_empty() {
			return Ok(0);
		}

		let count = page.logs.len();
		send(state, encode(&Push::LogPage(page))?).await?;
		state.offset += count;
		Ok(count)
	}

	async fn snapshot_frame(&self) -> Result<String, SendError> {
		encode(&Push::Snapshot {
			servers: self.supervisor.snapshot().await,
		})
	}
}

async fn send(state: &mut SessionState, frame: String) -> Result<(), SendError> {
	match tokio::time::timeout(SEND_TIMEOUT, state.sink.send(frame)).await {
		Ok(result) => result,
		Err(_) => Err(SendError(format!("client did not accept a frame within {:?}", SEND_TIMEOUT))),
	}
}

fn encode(push: &Push) -> Result<String, SendError> {
	serde_json::to_string(push).map_err(|e| SendError(e.to_string()))
}
