use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::bus::StateBus;
use crate::types::{LogEntry, OutputKind};

/// Largest number of entries handed out in one page.
pub const PAGE_SIZE: usize = 1000;

/// Append-only log of one process, shared between its readers and observers.
#[derive(Clone, Default)]
pub struct LogBuffer {
	inner: Arc<RwLock<Entries>>,
}

#[derive(Default)]
struct Entries {
	entries: Vec<LogEntry>,
	stdout: usize,
	stderr: usize,
}

impl LogBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn push(&self, entry: LogEntry) {
		let mut inner = self.inner.write().await;
		match entry.output {
			OutputKind::Stdout => inner.stdout += 1,
			OutputKind::Stderr => inner.stderr += 1,
		}
		inner.entries.push(entry);
	}

	pub async fn len(&self) -> usize {
		self.inner.read().await.entries.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}

	/// `(stdout, stderr)` entry counts.
	pub async fn counts(&self) -> (usize, usize) {
		let inner = self.inner.read().await;
		(inner.stdout, inner.stderr)
	}

	/// Up to `limit` entries starting at `offset`, plus the total entry count.
	pub async fn page(&self, offset: usize, limit: usize) -> (Vec<LogEntry>, usize) {
		let inner = self.inner.read().await;
		let total = inner.entries.len();
		let start = offset.min(total);
		let end = start.saturating_add(limit).min(total);
		(inner.entries[start..end].to_vec(), total)
	}
}

/// Read `reader` line by line into `buffer` until the pipe closes.
///
/// Lines are stamped when we read them, not when the child wrote them, so the order
/// between stdout and stderr is only as good as the scheduler's.
pub fn capture<R>(reader: R, output: OutputKind, buffer: LogBuffer, bus: StateBus) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		pipe_output(reader, output, buffer, bus).await;
	})
}

async fn pipe_output<R: AsyncRead + Unpin>(reader: R, output: OutputKind, buffer: LogBuffer, bus: StateBus) {
	let mut reader = BufReader::new(reader);
	let mut line = Vec::new();
	loop {
		line.clear();
		match reader.read_until(b'\n', &mut line).await {
			Ok(0) => break,
			Ok(_) => {
				let text = String::from_utf8_lossy(&line);
				let text = text.trim_end_matches('\n').trim_end_matches('\r');
				buffer.push(LogEntry::now(output, text)).await;
				bus.notify();
			}
			Err(e) => {
				tracing::debug!("{} reader stopped: {}", output, e);
				break;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus;

	async fn filled(n: usize) -> LogBuffer {
		let buffer = LogBuffer::new();
		for i in 0..n {
			buffer.push(LogEntry::now(OutputKind::Stdout, format!("line {i}"))).await;
		}
		buffer
	}

	#[tokio::test]
	async fn page_from_zero_is_capped() {
		let buffer = filled(1500).await;
		let (logs, total) = buffer.page(0, PAGE_SIZE).await;
		assert_eq!(logs.len(), 1000);
		assert_eq!(total, 1500);
		assert_eq!(logs[0].message, "line 0");
		assert_eq!(logs[999].message, "line 999");

		let (rest, total) = buffer.page(1000, PAGE_SIZE).await;
		assert_eq!(rest.len(), 500);
		assert_eq!(total, 1500);
		assert_eq!(rest[0].message, "line 1000");
	}

	#[tokio::test]
	async fn small_buffer_returns_everything() {
		let buffer = filled(7).await;
		let (logs, total) = buffer.page(0, PAGE_SIZE).await;
		assert_eq!((logs.len(), total), (7, 7));
	}

	#[tokio::test]
	async fn offset_past_end_is_empty() {
		let buffer = filled(5).await;
		for offset in [5, 6, usize::MAX] {
			let (logs, total) = buffer.page(offset, PAGE_SIZE).await;
			assert!(logs.is_empty());
			assert_eq!(total, 5);
		}
	}

	#[tokio::test]
	async fn counts_split_by_stream() {
		let buffer = LogBuffer::new();
		buffer.push(LogEntry::now(OutputKind::Stdout, "a")).await;
		buffer.push(LogEntry::now(OutputKind::Stderr, "b")).await;
		buffer.push(LogEntry::now(OutputKind::Stdout, "c")).await;
		assert_eq!(buffer.counts().await, (2, 1));
		assert_eq!(buffer.len().await, 3);
	}

	#[tokio::test]
	async fn capture_reads_lines_and_signals() {
		let (bus, mut changes) = bus::channel();
		let buffer = LogBuffer::new();
		let input: &'static [u8] = b"first\r\nsecond\n\xffthird";

		capture(input, OutputKind::Stderr, buffer.clone(), bus)
			.await
			.unwrap();

		let (logs, total) = buffer.page(0, PAGE_SIZE).await;
		assert_eq!(total, 3);
		assert_eq!(logs[0].message, "first");
		assert_eq!(logs[1].message, "second");
		assert_eq!(logs[2].message, "\u{fffd}third");
		assert!(logs.iter().all(|l| l.output == OutputKind::Stderr));
		assert!(changes.take_pending());
	}
}
