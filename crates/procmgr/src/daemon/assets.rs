use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

/// On-disk UI, relative to the daemon's working directory.
pub const STATIC_DIR: &str = "static";

#[derive(RustEmbed)]
#[folder = "static/"]
struct UiAssets;

pub async fn embedded(uri: Uri) -> Response {
	let path = uri.path().trim_start_matches('/');
	let path = if path.is_empty() { "index.html" } else { path };

	match UiAssets::get(path) {
		Some(content) => serve_asset(path, content),
		None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
	}
}

fn serve_asset(path: &str, content: rust_embed::EmbeddedFile) -> Response {
	let mime = mime_guess::from_path(path).first_or_octet_stream();
	([(header::CONTENT_TYPE, mime.to_string())], content.data).into_response()
}
