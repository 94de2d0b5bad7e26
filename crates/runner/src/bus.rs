use tokio::sync::mpsc;

/// Producer half of the state change signal. Cheap to clone, never blocks.
#[derive(Clone, Debug)]
pub struct StateBus {
	tx: mpsc::Sender<()>,
}

/// Consumer half, owned by the broadcast loop.
#[derive(Debug)]
pub struct StateChanges {
	rx: mpsc::Receiver<()>,
}

/// The channel holds a single pending signal. Anything posted while one is already
/// pending is dropped, which is what coalesces bursts of log lines into one wakeup.
pub fn channel() -> (StateBus, StateChanges) {
	let (tx, rx) = mpsc::channel(1);
	(StateBus { tx }, StateChanges { rx })
}

impl StateBus {
	pub fn notify(&self) {
		match self.tx.try_send(()) {
			Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
			Err(mpsc::error::TrySendError::Closed(())) => {
				tracing::trace!("state change dropped, no broadcast loop running");
			}
		}
	}
}

impl StateChanges {
	/// Wait for the next signal. Returns false once every producer is gone.
	pub async fn changed(&mut self) -> bool {
		self.rx.recv().await.is_some()
	}

	/// Consume a pending signal without waiting.
	pub fn take_pending(&mut self) -> bool {
		self.rx.try_recv().is_ok()
	}
}
