use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use procmgr::client::Client;
use procmgr::{daemon, paths};
use procmgr_runner::{Config, ConfigStore, ServerDef, ServerStatus};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "procmgr", version, about = "Run development servers on random ports")]
struct Cli {
	/// Config file (default: $XDG_CONFIG_HOME/procmgr/config.toml)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Run the daemon in the foreground
	Serve,
	/// Show configured servers and what is running
	List {
		/// Print comma separated values instead of a table
		#[arg(long)]
		csv: bool,
	},
	/// Register a command run from the current directory
	Add {
		/// Server name (default: current directory name)
		#[arg(long)]
		name: Option<String>,
		/// Run the command through `direnv exec`
		#[arg(long)]
		direnv: bool,
		#[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
		cmd: Vec<String>,
	},
	/// Stop a server and forget its definition
	Remove { name: String },
	/// Start a server
	Start { name: String },
	/// Stop a server
	Stop { name: String },
}

fn main() {
	let cli = Cli::parse();
	let config_path = cli.config.unwrap_or_else(paths::config_file);

	if let Err(e) = run(config_path, cli.command) {
		eprintln!("{} {}", "error:".red().bold(), e);
		std::process::exit(1);
	}
}

fn serve(config_path: PathBuf) -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let runtime = tokio::runtime::Runtime::new()?;
	runtime.block_on(async {
		let store = ConfigStore::open(config_path)?;
		daemon::run(store).await?;
		Ok::<(), Box<dyn std::error::Error>>(())
	})
}

/// Client for the daemon configured in `config_path`.
fn client(config_path: &Path) -> Result<Client> {
	let settings = Config::read(config_path)?.settings;
	Ok(Client::new(settings.listen_url()))
}

fn run(config_path: PathBuf, command: Command) -> Result<()> {
	match command {
		Command::Serve => serve(config_path)?,
		Command::List { csv } => {
			let client = client(&config_path)?;
			let servers = client.servers()?;
			let state: HashMap<String, ServerStatus> = client
				.state()?
				.into_iter()
				.map(|s| (s.name.clone(), s))
				.collect();
			if csv {
				print_csv(&servers, &state);
			} else {
				print_table(&servers, &state);
			}
		}
		Command::Add { name, direnv, cmd } => {
			let def = new_definition(name, direnv, cmd.join(" "))?;
			client(&config_path)?.add(&def)?;
			eprintln!("{} {} ({})", "added".green(), def.name.bold(), def.cwd.dimmed());
		}
		Command::Remove { name } => {
			client(&config_path)?.remove(&name)?;
			eprintln!("{} {}", "removed".green(), name.bold());
		}
		Command::Start { name } => {
			let port = client(&config_path)?.start(&name)?;
			eprintln!("{} {} on port {}", "started".green(), name.bold(), port.cyan());
		}
		Command::Stop { name } => {
			client(&config_path)?.stop(&name)?;
			eprintln!("{} {}", "stopped".green(), name.bold());
		}
	}
	Ok(())
}

/// Definition for `cmd` run from the current directory, carrying the caller's `PATH`
/// so the daemon finds the same tools the shell does.
fn new_definition(name: Option<String>, use_direnv: bool, cmd: String) -> Result<ServerDef> {
	let cwd = std::env::current_dir()?;
	let name = match name {
		Some(n) => n,
		None => cwd
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.ok_or("cannot derive a name from the current directory, pass --name")?,
	};

	let mut env = BTreeMap::new();
	if let Ok(path) = std::env::var("PATH") {
		env.insert("PATH".to_string(), path);
	}

	Ok(ServerDef {
		name,
		cwd: cwd.display().to_string(),
		cmd,
		use_direnv,
		env,
	})
}

fn print_table(servers: &[ServerDef], state: &HashMap<String, ServerStatus>) {
	if servers.is_empty() {
		eprintln!("no servers configured, add one with 'procmgr add <cmd>'");
		return;
	}

	let width = servers.iter().map(|s| s.name.len()).max().unwrap_or(0);
	for server in servers {
		let status = state.get(&server.name);
		let (circle, label, port, pid) = match status {
			Some(s) if s.is_running => (
				if s.exited { "●".yellow().to_string() } else { "●".green().to_string() },
				if s.exited { "exited".yellow().to_string() } else { "on".green().to_string() },
				s.port.map(|p| format!(":{}", p)).unwrap_or_default(),
				s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
			),
			_ => ("●".red().to_string(), "off".red().to_string(), String::new(), "-".into()),
		};
		println!(
			"{} {:<width$} {:<6} {:<6} {:<8} {}",
			circle,
			server.name,
			label,
			port,
			pid,
			server.cmd.dimmed(),
			width = width
		);
	}
}

fn print_csv(servers: &[ServerDef], state: &HashMap<String, ServerStatus>) {
	println!("name,cwd,cmd,running,exited,port");
	for server in servers {
		let status = state.get(&server.name);
		let running = status.map(|s| s.is_running).unwrap_or(false);
		let exited = status.map(|s| s.exited).unwrap_or(false);
		let port = status.and_then(|s| s.port).map(|p| p.to_string()).unwrap_or_default();
		println!(
			"{},{},{},{},{},{}",
			csv_field(&server.name),
			csv_field(&server.cwd),
			csv_field(&server.cmd),
			running,
			exited,
			port
		);
	}
}

fn csv_field(value: &str) -> String {
	if value.contains([',', '"', '\n']) {
		format!("\"{}\"", value.replace('"', "\"\""))
	} else {
		value.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn csv_quotes_only_when_needed() {
		assert_eq!(csv_field("web"), "web");
		assert_eq!(csv_field("npm run dev, fast"), "\"npm run dev, fast\"");
		assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
	}

	#[test]
	fn cli_parses_add_with_trailing_command() {
		let cli = Cli::try_parse_from(["procmgr", "add", "--name", "api", "npm", "run", "dev", "--port", "3"])
			.unwrap();
		match cli.command {
			Command::Add { name, direnv, cmd } => {
				assert_eq!(name.as_deref(), Some("api"));
				assert!(!direnv);
				assert_eq!(cmd.join(" "), "npm run dev --port 3");
			}
			_ => panic!("expected add"),
		}
	}

	#[test]
	fn new_definition_uses_current_directory() {
		let def = new_definition(None, true, "make serve".into()).unwrap();
		let cwd = std::env::current_dir().unwrap();
		assert_eq!(def.cwd, cwd.display().to_string());
		assert_eq!(def.name, cwd.file_name().unwrap().to_string_lossy());
		assert!(def.use_direnv);
	}
}
