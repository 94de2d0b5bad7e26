use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named command the supervisor knows how to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerDef {
	pub name: String,
	pub cwd: String,
	pub cmd: String,
	#[serde(default)]
	pub use_direnv: bool,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
	Stdout,
	Stderr,
}

impl fmt::Display for OutputKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OutputKind::Stdout => write!(f, "stdout"),
			OutputKind::Stderr => write!(f, "stderr"),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
	pub timestamp: DateTime<Utc>,
	pub message: String,
	pub output: OutputKind,
}

impl LogEntry {
	pub fn now(output: OutputKind, message: impl Into<String>) -> Self {
		Self {
			timestamp: Utc::now(),
			message: message.into(),
			output,
		}
	}
}

/// One row of the server list pushed to observers.
///
/// `is_running` means the server has a supervised run: a port, a pid and a log
/// buffer. `exited` is set once that run's process has ended without being stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
	pub name: String,
	pub is_running: bool,
	#[serde(default)]
	pub exited: bool,
	pub port: Option<u16>,
	pub pid: Option<u32>,
	pub stdout_count: usize,
	pub stderr_count: usize,
}

/// A contiguous slice of one server's log buffer starting at `offset`.
///
/// `total_count` is the buffer length when the page was cut, so a client can tell
/// whether more entries remain past `offset + logs.len()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
	pub name: String,
	pub offset: usize,
	pub total_count: usize,
	pub logs: Vec<LogEntry>,
}

impl LogPage {
	pub fn empty(name: &str, offset: usize) -> Self {
		Self {
			name: name.to_string(),
			offset,
			total_count: 0,
			logs: Vec::new(),
		}
	}
}

/// Client to server: follow `name` starting after `offset` already-seen entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscribe {
	pub name: String,
	#[serde(default)]
	pub offset: usize,
}

/// Server to client push, tagged so observers never have to sniff the shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Push {
	Snapshot { servers: Vec<ServerStatus> },
	LogPage(LogPage),
}
