pub mod api;
pub mod assets;
pub mod ws;

use std::sync::Arc;

use procmgr_runner::bus::{self, StateBus};
use procmgr_runner::{ConfigStore, Hub, Supervisor, SupervisorConfig};

#[derive(Clone)]
pub struct AppState {
	pub store: Arc<ConfigStore>,
	pub supervisor: Arc<Supervisor>,
	pub hub: Arc<Hub>,
	pub bus: StateBus,
}

impl AppState {
	/// Wire the supervisor to a hub and start the broadcast loop. Needs a runtime.
	pub fn start(store: Arc<ConfigStore>, options: SupervisorConfig) -> Self {
		let (bus, changes) = bus::channel();
		let supervisor = Supervisor::new(Arc::clone(&store), bus.clone(), options);
		let hub = Hub::new(Arc::clone(&supervisor));
		tokio::spawn(Arc::clone(&hub).run(changes));
		Self {
			store,
			supervisor,
			hub,
			bus,
		}
	}
}

/// Serve the API and UI until Ctrl-C, then stop every running server.
pub async fn run(store: ConfigStore) -> std::io::Result<()> {
	let store = Arc::new(store);
	let settings = store.settings().await;
	let state = AppState::start(Arc::clone(&store), SupervisorConfig::default());
	let app = api::router(state.clone(), settings.use_filesystem);

	let addr = format!("{}:{}", settings.listen_address, settings.listen_port);
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.map_err(|e| std::io::Error::new(e.kind(), format!("failed to bind {}: {}", addr, e)))?;

	match store.path() {
		Some(path) => tracing::info!("using config {}", path.display()),
		None => tracing::info!("using in-memory config"),
	}
	tracing::info!("listening on {} (pid {})", settings.listen_url(), std::process::id());

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!("HTTP server error: {}", e);
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("shutting down");
		}
	}

	let running = state.supervisor.active_ports().await.len();
	if running > 0 {
		tracing::info!("stopping {} running server(s)", running);
	}
	state.supervisor.stop_all().await;
	Ok(())
}
