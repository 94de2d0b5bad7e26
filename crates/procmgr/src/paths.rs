use std::path::PathBuf;

pub const APP_NAME: &str = "procmgr";

/// Where the config file lives when `--config` is not given.
pub fn config_file() -> PathBuf {
	resolve(
		std::env::var("XDG_CONFIG_HOME").ok(),
		std::env::var("HOME").ok(),
	)
}

fn resolve(xdg_config_home: Option<String>, home: Option<String>) -> PathBuf {
	let dir = match (xdg_config_home, home) {
		(Some(dir), _) if !dir.is_empty() => PathBuf::from(dir).join(APP_NAME),
		(_, Some(home)) if !home.is_empty() => PathBuf::from(home).join(".config").join(APP_NAME),
		_ => PathBuf::from("/tmp").join(APP_NAME),
	};
	dir.join("config.toml")
}
