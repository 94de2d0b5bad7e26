use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use procmgr_runner::{Config, LogPage, RunnerError, ServerDef, ServerStatus};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::daemon::{assets, ws, AppState};

pub fn router(state: AppState, use_filesystem: bool) -> Router {
	let router = Router::new()
		.route("/api/config", get(get_config))
		.route("/api/config/server", get(list_servers).post(write_server))
		.route("/api/config/server/{name}", axum::routing::delete(delete_server))
		.route("/api/runner/{name}", post(start_server).delete(stop_server))
		.route("/api/state", get(state_snapshot))
		.route("/api/state/{name}", get(log_page))
		.route("/api/ws", get(ws::upgrade));

	let router = if use_filesystem {
		router.fallback_service(ServeDir::new(assets::STATIC_DIR))
	} else {
		router.fallback(assets::embedded)
	};

	router.layer(CorsLayer::permissive()).with_state(state)
}

#[derive(Serialize)]
struct ActionResponse {
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	port: Option<u16>,
}

impl ActionResponse {
	fn ok() -> Json<Self> {
		Json(Self {
			message: "OK".to_string(),
			port: None,
		})
	}
}

#[derive(Serialize)]
struct ErrorResponse {
	message: String,
}

/// A failed request, rendered as `{"message": ...}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	message: String,
}

impl From<RunnerError> for ApiError {
	fn from(e: RunnerError) -> Self {
		let status = if e.is_not_found() {
			StatusCode::NOT_FOUND
		} else if e.is_internal() {
			StatusCode::INTERNAL_SERVER_ERROR
		} else {
			StatusCode::BAD_REQUEST
		};
		Self {
			status,
			message: e.to_string(),
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST,
			message: rejection.body_text(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if self.status.is_server_error() {
			tracing::error!("request failed: {}", self.message);
		} else {
			tracing::warn!("request rejected: {}", self.message);
		}
		(self.status, Json(ErrorResponse { message: self.message })).into_response()
	}
}

async fn get_config(State(state): State<AppState>) -> Json<Config> {
	Json(state.store.config().await)
}

async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerDef>> {
	Json(state.store.servers().await.into_values().collect())
}

async fn write_server(
	State(state): State<AppState>,
	payload: Result<Json<ServerDef>, JsonRejection>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
	let Json(def) = payload?;
	let name = def.name.clone();

	state.store.write_server(def).await?;
	// a running instance was started from the old definition
	state.supervisor.stop(&name).await?;
	state.bus.notify();

	tracing::info!("{}: definition saved", name);
	Ok((StatusCode::CREATED, ActionResponse::ok()))
}

async fn delete_server(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
	if state.store.server(&name).await.is_none() {
		return Err(RunnerError::NotFound(name).into());
	}

	state.supervisor.stop(&name).await?;
	state.store.delete_server(&name).await?;
	state.bus.notify();

	tracing::info!("{}: definition removed", name);
	Ok(ActionResponse::ok())
}

async fn start_server(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
	let port = state.supervisor.start(&name).await?;
	Ok((
		StatusCode::CREATED,
		Json(ActionResponse {
			message: "OK".to_string(),
			port: Some(port),
		}),
	))
}

async fn stop_server(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
	state.supervisor.stop(&name).await?;
	Ok(ActionResponse::ok())
}

async fn state_snapshot(State(state): State<AppState>) -> Json<Vec<ServerStatus>> {
	Json(state.supervisor.snapshot().await)
}

#[derive(Deserialize)]
struct PageQuery {
	#[serde(default)]
	offset: usize,
}

async fn log_page(
	State(state): State<AppState>,
	Path(name): Path<String>,
	Query(query): Query<PageQuery>,
) -> Json<LogPage> {
	Json(state.supervisor.log_page(&name, query.offset).await)
}
