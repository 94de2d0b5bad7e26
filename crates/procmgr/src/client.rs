use procmgr_runner::{ServerDef, ServerStatus};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Errors from talking to a running daemon.
#[derive(Debug)]
pub enum ClientError {
	/// Nothing is listening at the daemon address.
	NotRunning(String),
	/// The daemon answered with an error status.
	Api { status: u16, message: String },
	/// Transport or decoding failure.
	Http(reqwest::Error),
}

impl std::fmt::Display for ClientError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ClientError::NotRunning(url) => {
				write!(f, "daemon not running at {} (start it with 'procmgr serve')", url)
			}
			ClientError::Api { status, message } => write!(f, "{} ({})", message, status),
			ClientError::Http(e) => write!(f, "http error: {}", e),
		}
	}
}

impl std::error::Error for ClientError {}

#[derive(Deserialize)]
struct ErrorBody {
	message: String,
}

#[derive(Deserialize)]
struct Started {
	port: u16,
}

/// Blocking client for the daemon's HTTP API.
pub struct Client {
	base_url: String,
	http: HttpClient,
}

impl Client {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			http: HttpClient::new(),
		}
	}

	pub fn servers(&self) -> Result<Vec<ServerDef>, ClientError> {
		self.json(self.http.get(self.url("/api/config/server")))
	}

	pub fn state(&self) -> Result<Vec<ServerStatus>, ClientError> {
		self.json(self.http.get(self.url("/api/state")))
	}

	pub fn add(&self, def: &ServerDef) -> Result<(), ClientError> {
		self.send(self.http.post(self.url("/api/config/server")).json(def)).map(|_| ())
	}

	pub fn remove(&self, name: &str) -> Result<(), ClientError> {
		let url = self.url(&format!("/api/config/server/{}", name));
		self.send(self.http.delete(url)).map(|_| ())
	}

	/// Start `name` and return its port.
	pub fn start(&self, name: &str) -> Result<u16, ClientError> {
		let started: Started = self.json(self.http.post(self.url(&format!("/api/runner/{}", name))))?;
		Ok(started.port)
	}

	pub fn stop(&self, name: &str) -> Result<(), ClientError> {
		self.send(self.http.delete(self.url(&format!("/api/runner/{}", name)))).map(|_| ())
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
		self.send(request)?.json().map_err(ClientError::Http)
	}

	fn send(&self, request: RequestBuilder) -> Result<reqwest::blocking::Response, ClientError> {
		let response = request.send().map_err(|e| {
			if e.is_connect() {
				ClientError::NotRunning(self.base_url.clone())
			} else {
				ClientError::Http(e)
			}
		})?;

		let status = response.status();
		if status.is_success() {
			return Ok(response);
		}

		let message = match response.json::<ErrorBody>() {
			Ok(body) => body.message,
			Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
		};
		Err(ClientError::Api {
			status: status.as_u16(),
			message,
		})
	}
}
