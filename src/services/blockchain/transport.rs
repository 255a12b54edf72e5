//! JSON-RPC transport for EVM nodes.
//!
//! Requests go through a `reqwest-middleware` client that retries transient
//! failures (connection errors, 5xx, 429) with exponential backoff. A 404 is
//! not transient and is surfaced as [`BlockChainError::NotFound`].

use std::{
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::DefaultRetryableStrategy;
use serde_json::{json, Value};
use url::Url;

use crate::{
	services::blockchain::BlockChainError,
	utils::http::{create_retryable_http_client, HttpRetryConfig},
};

/// Base trait for JSON-RPC transports
#[async_trait]
pub trait JsonRpcTransport: Send + Sync + Clone + 'static {
	/// Get the URL requests are sent to
	fn get_current_url(&self) -> String;

	/// Sends a JSON-RPC request and returns its `result` member
	async fn send_raw_request(&self, method: &str, params: Value)
		-> Result<Value, BlockChainError>;
}

/// HTTP JSON-RPC client
///
/// The client is cheap to clone and can be shared across tasks.
#[derive(Clone, Debug)]
pub struct HttpTransportClient {
	client: ClientWithMiddleware,
	url: Url,
	request_id: Arc<AtomicU64>,
}

impl HttpTransportClient {
	/// Creates a client for a single endpoint
	///
	/// # Arguments
	/// * `url` - JSON-RPC endpoint
	/// * `retry_config` - Retry policy for transient failures
	pub fn new(url: &str, retry_config: &HttpRetryConfig) -> Result<Self, BlockChainError> {
		let url = Url::parse(url)
			.map_err(|e| BlockChainError::internal_error(format!("Invalid URL {}: {}", url, e)))?;

		let http_client = reqwest::ClientBuilder::new()
			.pool_idle_timeout(Duration::from_secs(90))
			.pool_max_idle_per_host(32)
			.timeout(Duration::from_secs(30))
			.connect_timeout(Duration::from_secs(20))
			.build()
			.map_err(|e| {
				BlockChainError::internal_error(format!("Failed to create HTTP client: {}", e))
			})?;

		let client = create_retryable_http_client::<DefaultRetryableStrategy>(
			retry_config,
			http_client,
			None,
		);

		Ok(Self {
			client,
			url,
			request_id: Arc::new(AtomicU64::new(1)),
		})
	}
}

#[async_trait]
impl JsonRpcTransport for HttpTransportClient {
	fn get_current_url(&self) -> String {
		self.url.to_string()
	}

	async fn send_raw_request(
		&self,
		method: &str,
		params: Value,
	) -> Result<Value, BlockChainError> {
		let id = self.request_id.fetch_add(1, Ordering::Relaxed);
		let request = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		let response = self
			.client
			.post(self.url.clone())
			.json(&request)
			.send()
			.await?;

		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			return Err(BlockChainError::not_found(format!(
				"{} answered 404 for {}",
				self.url, method
			)));
		}
		if !status.is_success() {
			return Err(BlockChainError::request_error(format!(
				"{} failed with status {}",
				method, status
			)));
		}

		let body: Value = response.json().await.map_err(|e| {
			BlockChainError::request_error(format!("Failed to read {} response: {}", method, e))
		})?;

		if let Some(error) = body.get("error") {
			return Err(BlockChainError::request_error(format!(
				"{} returned an error: {}",
				method, error
			)));
		}

		body.get("result")
			.cloned()
			.ok_or_else(|| BlockChainError::request_error("Missing 'result' field".to_string()))
	}
}
