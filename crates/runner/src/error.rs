use crate::types::OutputKind;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
	#[error("unknown server: {0}")]
	UnknownServer(String),

	#[error("server is already running: {0}")]
	AlreadyRunning(String),

	#[error("no free port left in {min}..{max}")]
	OutOfPorts { min: u16, max: u16 },

	#[error("failed to start {name}: {source}")]
	Spawn {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to set up {stream} pipe for {name}")]
	PipeSetup { name: String, stream: OutputKind },

	#[error("server not found: {0}")]
	NotFound(String),

	#[error("invalid server definition: {0}")]
	InvalidDefinition(String),

	#[error("invalid config {path}: {message}")]
	Config { path: String, message: String },

	#[error("failed to write config {path}: {message}")]
	Persist { path: String, message: String },
}

impl RunnerError {
	/// Whether the caller asked for something that does not exist, as opposed to
	/// something that conflicts with current state.
	pub fn is_not_found(&self) -> bool {
		matches!(self, RunnerError::NotFound(_))
	}

	/// Failures on our side rather than the caller's.
	pub fn is_internal(&self) -> bool {
		matches!(self, RunnerError::Config { .. } | RunnerError::Persist { .. })
	}
}
