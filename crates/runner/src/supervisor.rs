use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{watch, RwLock};

use crate::bus::StateBus;
use crate::config::ConfigStore;
use crate::error::RunnerError;
use crate::launch::Launcher;
use crate::output::{self, LogBuffer, PAGE_SIZE};
use crate::ports;
use crate::types::{LogPage, OutputKind, ServerStatus};

/// How long a stopping process gets between SIGTERM and SIGKILL.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SupervisorConfig {
	pub stop_timeout: Duration,
	pub launcher: Launcher,
	pub rng: Box<dyn RngCore + Send + Sync>,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			stop_timeout: STOP_TIMEOUT,
			launcher: Launcher::default(),
			rng: Box::new(StdRng::from_entropy()),
		}
	}
}

pub struct Supervisor {
	config: Arc<ConfigStore>,
	registry: RwLock<Registry>,
	bus: StateBus,
	launcher: Launcher,
	stop_timeout: Duration,
	next_id: AtomicU64,
}

/// Everything behind the registry lock. Port choice lives here too so that picking a
/// port and claiming it happen under the same guard.
struct Registry {
	processes: HashMap<String, ActiveProcess>,
	rng: Box<dyn RngCore + Send + Sync>,
}

struct ActiveProcess {
	/// Distinguishes this run from an earlier or later one under the same name.
	id: u64,
	pid: u32,
	/// Held until the entry goes away, even after the process is gone.
	port: u16,
	logs: LogBuffer,
	exited: watch::Receiver<bool>,
}

impl ActiveProcess {
	fn has_exited(&self) -> bool {
		*self.exited.borrow()
	}
}

impl Supervisor {
	pub fn new(config: Arc<ConfigStore>, bus: StateBus, options: SupervisorConfig) -> Arc<Self> {
		Arc::new(Self {
			config,
			registry: RwLock::new(Registry {
				processes: HashMap::new(),
				rng: options.rng,
			}),
			bus,
			launcher: options.launcher,
			stop_timeout: options.stop_timeout,
			next_id: AtomicU64::new(1),
		})
	}

	pub fn config(&self) -> &Arc<ConfigStore> {
		&self.config
	}

	/// Start `name` and return the port it was given.
	pub async fn start(self: &Arc<Self>, name: &str) -> Result<u16, RunnerError> {
		let def = self
			.config
			.server(name)
			.await
			.ok_or_else(|| RunnerError::UnknownServer(name.to_string()))?;
		let range = self.config.settings().await.port_range();

		let mut registry = self.registry.write().await;
		let Registry { processes, rng } = &mut *registry;

		// an exited run keeps its entry until it is stopped or started again
		if let Some(current) = processes.get(name) {
			if !current.has_exited() {
				return Err(RunnerError::AlreadyRunning(name.to_string()));
			}
		}

		let in_use: HashSet<u16> = processes
			.iter()
			.filter(|(other, _)| other.as_str() != name)
			.map(|(_, p)| p.port)
			.collect();
		let port = ports::allocate(&in_use, range, rng)?;

		let mut child = self
			.launcher
			.command(&def, port)
			.spawn()
			.map_err(|source| RunnerError::Spawn {
				name: name.to_string(),
				source,
			})?;

		let (stdout, stderr) = take_pipes(name, &mut child).await?;

		let pid = child.id().unwrap_or(0);
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let logs = LogBuffer::new();
		let readers = [
			output::capture(stdout, OutputKind::Stdout, logs.clone(), self.bus.clone()),
			output::capture(stderr, OutputKind::Stderr, logs.clone(), self.bus.clone()),
		];

		let (exit_tx, exit_rx) = watch::channel(false);
		let replaced = processes.insert(
			name.to_string(),
			ActiveProcess {
				id,
				pid,
				port,
				logs,
				exited: exit_rx,
			},
		);
		drop(registry);

		if replaced.is_some() {
			tracing::info!("{}: discarded output of the previous run", name);
		}

		let bus = self.bus.clone();
		let server = name.to_string();
		tokio::spawn(async move {
			match child.wait().await {
				Ok(status) => tracing::info!("{}: exited ({})", server, status),
				Err(e) => tracing::warn!("{}: failed to wait for exit: {}", server, e),
			}
			let _ = exit_tx.send(true);
			// the last lines may still sit in the pipes
			for reader in readers {
				let _ = reader.await;
			}
			bus.notify();
		});

		tracing::info!("{}: started (pid {}, port {})", name, pid, port);
		self.bus.notify();
		Ok(port)
	}

	/// Stop `name`, waiting for it to exit. Stopping something that is not running
	/// succeeds without doing anything.
	///
	/// SIGTERM goes out immediately; if the process is still registered when the
	/// stop timeout fires it is SIGKILLed and dropped from the registry. A run that
	/// already exited on its own is dropped without signalling anything.
	pub async fn stop(self: &Arc<Self>, name: &str) -> Result<(), RunnerError> {
		let (id, pid, mut exited) = {
			let registry = self.registry.read().await;
			match registry.processes.get(name) {
				Some(p) => (p.id, p.pid, p.exited.clone()),
				None => return Ok(()),
			}
		};

		if *exited.borrow() {
			if self.remove_if(name, id).await {
				tracing::info!("{}: cleared exited run", name);
			}
			return Ok(());
		}

		tracing::info!("{}: stopping (pid {})", name, pid);

		let watchdog = {
			let sup = Arc::clone(self);
			let server = name.to_string();
			let timeout = self.stop_timeout;
			tokio::spawn(async move {
				tokio::time::sleep(timeout).await;
				if sup.remove_if(&server, id).await {
					tracing::warn!("{}: still running after {:?}, killed", server, timeout);
					signal_group(pid, Signal::SIGKILL);
				}
			})
		};

		signal_group(pid, Signal::SIGTERM);
		let _ = exited.wait_for(|done| *done).await;
		watchdog.abort();

		if self.remove_if(name, id).await {
			tracing::info!("{}: stopped", name);
		}
		Ok(())
	}

	/// Stop everything that is running, concurrently.
	pub async fn stop_all(self: &Arc<Self>) {
		let names: Vec<String> = self.registry.read().await.processes.keys().cloned().collect();
		futures::future::join_all(names.iter().map(|name| self.stop(name))).await;
	}

	/// Whether `name` has an entry, including a run that exited on its own and has
	/// not been stopped yet.
	pub async fn is_running(&self, name: &str) -> bool {
		self.registry.read().await.processes.contains_key(name)
	}

	pub async fn port(&self, name: &str) -> Option<u16> {
		self.registry.read().await.processes.get(name).map(|p| p.port)
	}

	pub async fn active_ports(&self) -> HashMap<String, u16> {
		let registry = self.registry.read().await;
		registry
			.processes
			.iter()
			.map(|(name, p)| (name.clone(), p.port))
			.collect()
	}

	/// One row per configured server, running or not.
	pub async fn snapshot(&self) -> Vec<ServerStatus> {
		let names = self.config.server_names().await;
		let running: HashMap<String, (u16, u32, bool, LogBuffer)> = {
			let registry = self.registry.read().await;
			registry
				.processes
				.iter()
				.map(|(name, p)| (name.clone(), (p.port, p.pid, p.has_exited(), p.logs.clone())))
				.collect()
		};

		let mut result = Vec::with_capacity(names.len());
		for name in names {
			let status = match running.get(&name) {
				Some((port, pid, exited, logs)) => {
					let (stdout_count, stderr_count) = logs.counts().await;
					ServerStatus {
						name,
						is_running: true,
						exited: *exited,
						port: Some(*port),
						pid: Some(*pid),
						stdout_count,
						stderr_count,
					}
				}
				None => ServerStatus {
					name,
					is_running: false,
					exited: false,
					port: None,
					pid: None,
					stdout_count: 0,
					stderr_count: 0,
				},
			};
			result.push(status);
		}
		result
	}

	/// Entries of `name` from `offset` on. Unknown or stopped servers give an empty
	/// page with a zero total. A run that exited on its own keeps its entries until
	/// it is stopped or started again.
	pub async fn log_page(&self, name: &str, offset: usize) -> LogPage {
		let logs = self
			.registry
			.read()
			.await
			.processes
			.get(name)
			.map(|p| p.logs.clone());

		match logs {
			Some(logs) => {
				let (entries, total_count) = logs.page(offset, PAGE_SIZE).await;
				LogPage {
					name: name.to_string(),
					offset,
					total_count,
					logs: entries,
				}
			}
			None => LogPage::empty(name, offset),
		}
	}

	/// Drop the entry for `name` only if it is still run `id`. Whoever gets here first
	/// wins; later callers see `false`.
	async fn remove_if(&self, name: &str, id: u64) -> bool {
		let removed = {
			let mut registry = self.registry.write().await;
			let current = registry.processes.get(name).map(|p| p.id) == Some(id);
			if current {
				registry.processes.remove(name);
			}
			current
		};
		if removed {
			self.bus.notify();
		}
		removed
	}
}

/// Both output pipes of a fresh child. Without them the child is killed and reaped
/// so no half-started process is left behind.
async fn take_pipes(name: &str, child: &mut Child) -> Result<(ChildStdout, ChildStderr), RunnerError> {
	match (child.stdout.take(), child.stderr.take()) {
		(Some(stdout), Some(stderr)) => Ok((stdout, stderr)),
		(stdout, _) => {
			if let Err(e) = child.kill().await {
				tracing::warn!("{}: failed to kill after pipe setup error: {}", name, e);
			}
			let stream = if stdout.is_none() { OutputKind::Stdout } else { OutputKind::Stderr };
			Err(RunnerError::PipeSetup {
				name: name.to_string(),
				stream,
			})
		}
	}
}

fn signal_group(pid: u32, signal: Signal) {
	// pid 0 would address our own process group
	if pid == 0 {
		return;
	}
	let pgid = Pid::from_raw(pid as i32);
	if let Err(e) = killpg(pgid, signal) {
		tracing::debug!("{:?} to process group {} failed: {}", signal, pid, e);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::process::Stdio;
	use tokio::process::Command;

	#[tokio::test]
	async fn missing_pipe_kills_and_reaps_child() {
		let mut child = Command::new("sleep")
			.arg("30")
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.spawn()
			.unwrap();

		let err = take_pipes("web", &mut child).await.unwrap_err();
		assert!(matches!(
			err,
			RunnerError::PipeSetup { ref name, stream: OutputKind::Stderr } if name == "web"
		));
		assert!(child.try_wait().unwrap().is_some());
	}

	#[tokio::test]
	async fn both_pipes_are_handed_over() {
		let mut child = Command::new("true")
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.unwrap();

		assert!(take_pipes("web", &mut child).await.is_ok());
		assert!(child.stdout.is_none() && child.stderr.is_none());
		child.wait().await.unwrap();
	}
}
