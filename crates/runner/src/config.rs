use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::RunnerError;
use crate::types::ServerDef;

// ── config.toml ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
	#[serde(default)]
	pub settings: Settings,
	#[serde(default)]
	pub servers: BTreeMap<String, ServerDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
	#[serde(default = "default_listen_address")]
	pub listen_address: String,
	#[serde(default = "default_listen_port")]
	pub listen_port: u16,
	#[serde(default = "default_port_range_min")]
	pub port_range_min: u16,
	#[serde(default = "default_port_range_max")]
	pub port_range_max: u16,
	/// Serve the UI from `./static` on disk instead of the embedded copy.
	#[serde(default)]
	pub use_filesystem: bool,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			listen_address: default_listen_address(),
			listen_port: default_listen_port(),
			port_range_min: default_port_range_min(),
			port_range_max: default_port_range_max(),
			use_filesystem: false,
		}
	}
}

impl Settings {
	/// Ports handed to servers, upper bound exclusive.
	pub fn port_range(&self) -> Range<u16> {
		self.port_range_min..self.port_range_max
	}

	pub fn listen_url(&self) -> String {
		format!("http://{}:{}", self.listen_address, self.listen_port)
	}
}

fn default_listen_address() -> String { "127.0.0.1".into() }
fn default_listen_port() -> u16 { 6969 }
fn default_port_range_min() -> u16 { 40000 }
fn default_port_range_max() -> u16 { 41000 }

impl Config {
	/// Read a config file. A missing file is not an error: it yields defaults and
	/// gets created on the first write.
	pub fn read(path: &Path) -> Result<Self, RunnerError> {
		let content = match std::fs::read_to_string(path) {
			Ok(c) => c,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				tracing::info!(
					"no config at {}, using defaults until the first change",
					path.display()
				);
				return Ok(Config::default());
			}
			Err(e) => return Err(config_error(path, e.to_string())),
		};

		let config: Config =
			toml::from_str(&content).map_err(|e| config_error(path, e.to_string()))?;
		config.validate().map_err(|e| config_error(path, e))?;
		tracing::info!("parsed config file {}", path.display());
		Ok(config)
	}

	fn validate(&self) -> Result<(), String> {
		if self.settings.port_range_min >= self.settings.port_range_max {
			return Err(format!(
				"port_range_min ({}) must be below port_range_max ({})",
				self.settings.port_range_min, self.settings.port_range_max
			));
		}
		for (key, def) in &self.servers {
			if key != &def.name {
				return Err(format!("server '{}' is stored under key '{}'", def.name, key));
			}
			validate_server(def)?;
		}
		Ok(())
	}
}

fn config_error(path: &Path, message: String) -> RunnerError {
	RunnerError::Config {
		path: path.display().to_string(),
		message,
	}
}

pub fn validate_server(def: &ServerDef) -> Result<(), String> {
	if def.name.is_empty() {
		return Err("'name' cannot be empty".into());
	}
	if def.name.contains('/') {
		return Err("'name' cannot contain '/'".into());
	}
	if def.cwd.is_empty() {
		return Err("'cwd' cannot be empty".into());
	}
	if def.cmd.is_empty() {
		return Err("'cmd' cannot be empty".into());
	}
	Ok(())
}

// ── ConfigStore ──────────────────────────────────────────────────────────────

/// Shared, persisted server definitions.
///
/// Every mutation rewrites the backing file before it becomes visible to readers.
/// A store without a path keeps everything in memory.
pub struct ConfigStore {
	path: Option<PathBuf>,
	inner: RwLock<Config>,
}

impl ConfigStore {
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, RunnerError> {
		let path = path.into();
		let config = Config::read(&path)?;
		Ok(Self {
			path: Some(path),
			inner: RwLock::new(config),
		})
	}

	pub fn in_memory(config: Config) -> Self {
		Self {
			path: None,
			inner: RwLock::new(config),
		}
	}

	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	pub async fn config(&self) -> Config {
		self.inner.read().await.clone()
	}

	pub async fn settings(&self) -> Settings {
		self.inner.read().await.settings.clone()
	}

	pub async fn servers(&self) -> BTreeMap<String, ServerDef> {
		self.inner.read().await.servers.clone()
	}

	pub async fn server_names(&self) -> Vec<String> {
		self.inner.read().await.servers.keys().cloned().collect()
	}

	pub async fn server(&self, name: &str) -> Option<ServerDef> {
		self.inner.read().await.servers.get(name).cloned()
	}

	/// Create or replace a definition.
	pub async fn write_server(&self, def: ServerDef) -> Result<(), RunnerError> {
		validate_server(&def).map_err(RunnerError::InvalidDefinition)?;

		let mut config = self.inner.write().await;
		let mut next = config.clone();
		next.servers.insert(def.name.clone(), def);
		self.save(&next).await?;
		*config = next;
		Ok(())
	}

	pub async fn delete_server(&self, name: &str) -> Result<ServerDef, RunnerError> {
		let mut config = self.inner.write().await;
		let mut next = config.clone();
		let removed = next
			.servers
			.remove(name)
			.ok_or_else(|| RunnerError::NotFound(name.to_string()))?;
		self.save(&next).await?;
		*config = next;
		Ok(removed)
	}

	/// Write `config` to a temp file next to the target and rename it over. Runs under
	/// the write guard so concurrent mutations land on disk in order.
	async fn save(&self, config: &Config) -> Result<(), RunnerError> {
		let Some(path) = &self.path else {
			return Ok(());
		};
		let persist_error = |message: String| RunnerError::Persist {
			path: path.display().to_string(),
			message,
		};

		tracing::info!("writing config file {}", path.display());
		let content = toml::to_string_pretty(config).map_err(|e| persist_error(e.to_string()))?;

		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| persist_error(e.to_string()))?;
		}
		let tmp = path.with_extension("toml.tmp");
		tokio::fs::write(&tmp, content)
			.await
			.map_err(|e| persist_error(e.to_string()))?;
		tokio::fs::rename(&tmp, path)
			.await
			.map_err(|e| persist_error(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_config(name: &str) -> PathBuf {
		let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!(
			"procmgr-config-{}-{}-{}",
			std::process::id(),
			n,
			name
		));
		let _ = std::fs::remove_dir_all(&dir);
		dir.join("config.toml")
	}

	fn web() -> ServerDef {
		ServerDef {
			name: "web".into(),
			cwd: "/tmp".into(),
			cmd: "printf hello".into(),
			..Default::default()
		}
	}

	#[test]
	fn missing_file_yields_defaults() {
		let path = temp_config("missing");
		let config = Config::read(&path).unwrap();
		assert_eq!(config, Config::default());
		assert_eq!(config.settings.port_range(), 40000..41000);
		assert!(!path.exists());
	}

	#[test]
	fn partial_settings_fill_defaults() {
		let path = temp_config("partial");
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, "[settings]\nlisten_port = 7000\n").unwrap();

		let config = Config::read(&path).unwrap();
		assert_eq!(config.settings.listen_port, 7000);
		assert_eq!(config.settings.listen_address, "127.0.0.1");
		assert_eq!(config.settings.port_range_max, 41000);
	}

	#[test]
	fn inverted_port_range_is_rejected() {
		let path = temp_config("inverted");
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, "[settings]\nport_range_min = 5000\nport_range_max = 5000\n").unwrap();

		let err = Config::read(&path).unwrap_err();
		assert!(matches!(err, RunnerError::Config { .. }), "got {err}");
	}

	#[test]
	fn empty_fields_are_rejected() {
		assert!(validate_server(&web()).is_ok());
		assert!(validate_server(&ServerDef { name: String::new(), ..web() }).is_err());
		assert!(validate_server(&ServerDef { cwd: String::new(), ..web() }).is_err());
		assert!(validate_server(&ServerDef { cmd: String::new(), ..web() }).is_err());
		assert!(validate_server(&ServerDef { name: "a/b".into(), ..web() }).is_err());
	}

	#[tokio::test]
	async fn writes_survive_reopen() {
		let path = temp_config("persist");
		let store = ConfigStore::open(&path).unwrap();

		let mut def = web();
		def.env.insert("PATH".into(), "/usr/bin:/bin".into());
		def.use_direnv = true;
		store.write_server(def.clone()).await.unwrap();
		assert!(path.exists());

		let reopened = ConfigStore::open(&path).unwrap();
		assert_eq!(reopened.server("web").await, Some(def));

		reopened.delete_server("web").await.unwrap();
		let again = ConfigStore::open(&path).unwrap();
		assert!(again.server_names().await.is_empty());

		let _ = std::fs::remove_dir_all(path.parent().unwrap());
	}

	#[tokio::test]
	async fn failed_write_keeps_previous_state() {
		let path = temp_config("unwritable");
		let store = ConfigStore::open(&path).unwrap();
		store.write_server(web()).await.unwrap();

		// a directory where the temp file should go makes the write fail
		std::fs::create_dir_all(path.with_extension("toml.tmp")).unwrap();
		let err = store
			.write_server(ServerDef { name: "api".into(), ..web() })
			.await
			.unwrap_err();
		assert!(matches!(err, RunnerError::Persist { .. }), "got {err}");
		assert!(err.is_internal());
		assert_eq!(store.server_names().await, vec!["web".to_string()]);

		let _ = std::fs::remove_dir_all(path.parent().unwrap());
	}

	#[tokio::test]
	async fn delete_unknown_is_not_found() {
		let store = ConfigStore::in_memory(Config::default());
		let err = store.delete_server("ghost").await.unwrap_err();
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn invalid_write_leaves_store_untouched() {
		let store = ConfigStore::in_memory(Config::default());
		let err = store
			.write_server(ServerDef { cmd: String::new(), ..web() })
			.await
			.unwrap_err();
		assert!(matches!(err, RunnerError::InvalidDefinition(_)));
		assert!(store.servers().await.is_empty());
	}
}
