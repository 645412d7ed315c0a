use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::source::Collection;

#[derive(Debug, Error)]
pub enum SearchError {
	#[error("index not found")]
	IndexNotFound,
	#[error("search service unreachable: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("search service error ({code}): {message}")]
	Api { code: String, message: String },
	#[error("invalid search endpoint: {0}")]
	Endpoint(#[from] url::ParseError),
	#[error("search api key is not a valid header value")]
	InvalidApiKey,
}

/// Result of the search service health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexHealth {
	Available,
	/// The service answered but did not report `available`; carries the
	/// status string it reported (or the HTTP status when there was none).
	Unavailable(String),
}

/// Per-index statistics as reported by `GET /indexes/{uid}/stats`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
	pub number_of_documents: u64,
	#[serde(default)]
	pub is_indexing: bool,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
	status: String,
}

/// MeiliSearch error envelope: `{message, code, type, link}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
	message: String,
	code: String,
}

impl ErrorEnvelope {
	fn into_error(self) -> SearchError {
		if self.code == "index_not_found" {
			SearchError::IndexNotFound
		} else {
			SearchError::Api {
				code: self.code,
				message: self.message,
			}
		}
	}
}

/// The Reconciler's view of the search service: a health probe and
/// per-index statistics. Implemented by `SearchClient` and any test doubles.
#[async_trait]
pub trait SearchIndex: Send + Sync + 'static {
	async fn health(&self) -> Result<IndexHealth, SearchError>;

	/// Statistics for one index; a missing index is
	/// `Err(SearchError::IndexNotFound)`, never a raw absent field.
	async fn stats(&self, collection: &Collection) -> Result<IndexStats, SearchError>;
}

/// Index administration used by the bulk resync path only.
#[async_trait]
pub trait IndexAdmin: Send + Sync + 'static {
	/// Create the index if it does not exist; an already-existing index is
	/// success.
	async fn ensure_index(
		&self,
		collection: &Collection,
		primary_key: &str,
	) -> Result<(), SearchError>;

	/// Delete all documents in the index.
	async fn clear_documents(&self, collection: &Collection) -> Result<(), SearchError>;

	/// Add or replace a batch of documents. Ingestion on the search side is
	/// asynchronous (202 + task queue); acceptance is treated as success.
	async fn add_documents(
		&self,
		collection: &Collection,
		documents: &[Value],
	) -> Result<(), SearchError>;
}

/// HTTP client for a MeiliSearch-compatible search service.
pub struct SearchClient {
	base: Url,
	client: Client,
}

impl SearchClient {
	pub fn new(host: &str, api_key: &str, timeout: Duration) -> Result<Self, SearchError> {
		// A trailing slash keeps Url::join from swallowing the last path
		// segment when the host carries a path prefix.
		let normalized = if host.ends_with('/') {
			host.to_string()
		} else {
			format!("{}/", host)
		};
		let base = Url::parse(&normalized)?;

		let mut builder = Client::builder().timeout(timeout);
		if !api_key.is_empty() {
			let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key))
				.map_err(|_| SearchError::InvalidApiKey)?;
			value.set_sensitive(true);
			let mut headers = HeaderMap::new();
			headers.insert(AUTHORIZATION, value);
			builder = builder.default_headers(headers);
		}
		let client = builder.build()?;

		Ok(Self { base, client })
	}

	fn endpoint(&self, path: &str) -> Result<Url, SearchError> {
		Ok(self.base.join(path)?)
	}

	/// Decode a non-success response into a typed error. A bare 404 with no
	/// envelope still maps to `IndexNotFound`; everything this client
	/// requests under `/indexes/{uid}` only 404s when the index is missing.
	async fn decode_error(resp: reqwest::Response) -> SearchError {
		let status = resp.status();
		match resp.json::<ErrorEnvelope>().await {
			Ok(envelope) => envelope.into_error(),
			Err(_) if status == StatusCode::NOT_FOUND => SearchError::IndexNotFound,
			Err(_) => SearchError::Api {
				code: status.as_u16().to_string(),
				message: "unrecognized error response".to_string(),
			},
		}
	}
}

fn health_from_status(status: &str) -> IndexHealth {
	if status == "available" {
		IndexHealth::Available
	} else {
		IndexHealth::Unavailable(status.to_string())
	}
}

#[async_trait]
impl SearchIndex for SearchClient {
	async fn health(&self) -> Result<IndexHealth, SearchError> {
		let url = self.endpoint("health")?;
		let resp = self.client.get(url).send().await?;
		if !resp.status().is_success() {
			return Ok(IndexHealth::Unavailable(resp.status().to_string()));
		}
		let health = resp.json::<HealthResponse>().await?;
		debug!("search service health: {}", health.status);
		Ok(health_from_status(&health.status))
	}

	async fn stats(&self, collection: &Collection) -> Result<IndexStats, SearchError> {
		let url = self.endpoint(&format!("indexes/{}/stats", collection))?;
		let resp = self.client.get(url).send().await?;
		if !resp.status().is_success() {
			return Err(Self::decode_error(resp).await);
		}
		Ok(resp.json::<IndexStats>().await?)
	}
}

#[async_trait]
impl IndexAdmin for SearchClient {
	async fn ensure_index(
		&self,
		collection: &Collection,
		primary_key: &str,
	) -> Result<(), SearchError> {
		let url = self.endpoint("indexes")?;
		let body = serde_json::json!({
			"uid": collection.as_str(),
			"primaryKey": primary_key,
		});
		let resp = self.client.post(url).json(&body).send().await?;
		if resp.status().is_success() {
			return Ok(());
		}
		match Self::decode_error(resp).await {
			SearchError::Api { code, .. } if code == "index_already_exists" => Ok(()),
			err => Err(err),
		}
	}

	async fn clear_documents(&self, collection: &Collection) -> Result<(), SearchError> {
		let url = self.endpoint(&format!("indexes/{}/documents", collection))?;
		let resp = self.client.delete(url).send().await?;
		if resp.status().is_success() {
			Ok(())
		} else {
			Err(Self::decode_error(resp).await)
		}
	}

	async fn add_documents(
		&self,
		collection: &Collection,
		documents: &[Value],
	) -> Result<(), SearchError> {
		let url = self.endpoint(&format!("indexes/{}/documents", collection))?;
		let resp = self.client.post(url).json(documents).send().await?;
		if resp.status().is_success() {
			Ok(())
		} else {
			Err(Self::decode_error(resp).await)
		}
	}
}
