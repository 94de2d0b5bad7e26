//! # procmgr-runner
//!
//! Runs named development servers on random ports and streams their state.
//!
//! Server definitions live in a [`ConfigStore`]. The [`Supervisor`] starts them with a
//! `PORT` from the configured range, captures stdout and stderr line by line, and
//! signals every change on a [`StateBus`]. The [`Hub`] turns those signals into
//! rate-limited pushes to connected observers.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use procmgr_runner::{bus, Config, ConfigStore, Hub, ServerDef, Supervisor, SupervisorConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut config = Config::default();
//! config.servers.insert("web".into(), ServerDef {
//!     name: "web".into(),
//!     cwd: "/tmp".into(),
//!     cmd: "python3 -m http.server".into(),
//!     ..Default::default()
//! });
//!
//! let (bus, changes) = bus::channel();
//! let sup = Supervisor::new(Arc::new(ConfigStore::in_memory(config)), bus, SupervisorConfig::default());
//! let hub = Hub::new(Arc::clone(&sup));
//! tokio::spawn(Arc::clone(&hub).run(changes));
//!
//! let port = sup.start("web").await.unwrap();
//! println!("web is on {port}");
//! sup.stop("web").await.unwrap();
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod hub;
pub mod launch;
pub mod output;
pub mod ports;
pub mod supervisor;
pub mod types;

pub use bus::{StateBus, StateChanges};
pub use config::{Config, ConfigStore, Settings};
pub use error::RunnerError;
pub use hub::{FrameSink, Hub, SendError, SessionId};
pub use launch::{CommandStrategy, Direct, EnvWrapper, Invocation, Launcher};
pub use output::LogBuffer;
pub use supervisor::{Supervisor, SupervisorConfig};
pub use types::*;
