use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::types::ServerDef;

/// Program plus arguments, before any process state is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
	pub program: String,
	pub args: Vec<String>,
}

/// Turns a stored command line into something `exec` can run.
pub trait CommandStrategy: Send + Sync {
	fn invocation(&self, cmd: &str) -> Invocation;
}

/// Run the command as-is: the program is everything up to the first space and the
/// remainder, if any, is passed through as a single argument.
#[derive(Debug, Clone, Default)]
pub struct Direct;

impl CommandStrategy for Direct {
	fn invocation(&self, cmd: &str) -> Invocation {
		match cmd.split_once(' ') {
			Some((program, rest)) => Invocation {
				program: program.to_string(),
				args: vec![rest.to_string()],
			},
			None => Invocation {
				program: cmd.to_string(),
				args: vec![],
			},
		}
	}
}

/// Run the command through an environment-resolution tool in the working directory,
/// e.g. `direnv exec . <program> -- <rest>`.
#[derive(Debug, Clone)]
pub struct EnvWrapper {
	tool: String,
}

impl EnvWrapper {
	pub fn new(tool: impl Into<String>) -> Self {
		Self { tool: tool.into() }
	}

	pub fn direnv() -> Self {
		Self::new("direnv")
	}
}

impl CommandStrategy for EnvWrapper {
	fn invocation(&self, cmd: &str) -> Invocation {
		let inner = Direct.invocation(cmd);
		let mut args = vec!["exec".to_string(), ".".to_string(), inner.program];
		if !inner.args.is_empty() {
			args.push("--".to_string());
			args.extend(inner.args);
		}
		Invocation {
			program: self.tool.clone(),
			args,
		}
	}
}

/// Chooses a strategy per definition and builds the child command.
#[derive(Clone)]
pub struct Launcher {
	direct: Arc<dyn CommandStrategy>,
	wrapped: Arc<dyn CommandStrategy>,
}

impl Default for Launcher {
	fn default() -> Self {
		Self::new(Arc::new(Direct), Arc::new(EnvWrapper::direnv()))
	}
}

impl Launcher {
	pub fn new(direct: Arc<dyn CommandStrategy>, wrapped: Arc<dyn CommandStrategy>) -> Self {
		Self { direct, wrapped }
	}

	pub fn invocation(&self, def: &ServerDef) -> Invocation {
		let strategy = if def.use_direnv { &self.wrapped } else { &self.direct };
		strategy.invocation(&def.cmd)
	}

	/// The child inherits our environment, plus its port and, if the definition
	/// stores one, its `PATH`. Other stored variables are not exported.
	pub fn command(&self, def: &ServerDef, port: u16) -> Command {
		let invocation = self.invocation(def);

		let mut cmd = Command::new(&invocation.program);
		cmd.args(&invocation.args)
			.current_dir(&def.cwd)
			.env("PORT", port.to_string())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0);

		if let Some(path) = def.env.get("PATH") {
			cmd.env("PATH", path);
		}

		cmd
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn def(cmd: &str, use_direnv: bool) -> ServerDef {
		ServerDef {
			name: "web".into(),
			cwd: "/tmp".into(),
			cmd: cmd.into(),
			use_direnv,
			..Default::default()
		}
	}

	#[test]
	fn direct_splits_on_first_space_only() {
		let inv = Direct.invocation("npm run dev --port 3000");
		assert_eq!(inv.program, "npm");
		assert_eq!(inv.args, vec!["run dev --port 3000".to_string()]);
	}

	#[test]
	fn direct_without_arguments() {
		let inv = Direct.invocation("./server");
		assert_eq!(inv.program, "./server");
		assert!(inv.args.is_empty());
	}

	#[test]
	fn wrapper_puts_rest_after_separator() {
		let inv = EnvWrapper::direnv().invocation("hugo server -D");
		assert_eq!(inv.program, "direnv");
		assert_eq!(inv.args, vec!["exec", ".", "hugo", "--", "server -D"]);

		let inv = EnvWrapper::direnv().invocation("hugo");
		assert_eq!(inv.args, vec!["exec", ".", "hugo"]);
	}

	#[test]
	fn launcher_picks_strategy_from_flag() {
		let launcher = Launcher::default();
		assert_eq!(launcher.invocation(&def("printf hello", false)).program, "printf");
		assert_eq!(launcher.invocation(&def("printf hello", true)).program, "direnv");
	}

	#[test]
	fn wrapper_can_be_swapped() {
		let launcher = Launcher::new(Arc::new(Direct), Arc::new(EnvWrapper::new("nix-env-run")));
		let inv = launcher.invocation(&def("make serve", true));
		assert_eq!(inv.program, "nix-env-run");
		assert_eq!(inv.args, vec!["exec", ".", "make", "--", "serve"]);
	}
}
