//! Indexer REST client and session bootstrap.
//!
//! The indexer hands out a session cookie on `GET /blocks/best`. The cookie is
//! required by the realtime socket, so the bootstrap retries forever with a
//! capped exponential backoff: there is no useful offline mode to fall back to.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::DefaultRetryableStrategy;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
	models::SyncConfig,
	services::{
		bus::EventBus,
		indexer::{feed, FeedStream, IndexerError},
	},
	utils::http::{create_retryable_http_client, HttpRetryConfig},
};

/// Name reported in `wallet-error` events raised by the indexer
pub const INDEXER_PLUGIN: &str = "indexer";

/// Capabilities of the transaction indexer consumed by the engine
#[async_trait]
pub trait IndexerApi: Send + Sync {
	/// Hashes of the transactions involving `address` within a block range
	async fn get_transactions(
		&self,
		from_block: u64,
		to_block: u64,
		address: &str,
	) -> Result<Vec<String>, IndexerError>;

	/// Realtime feed of transactions involving `address`
	///
	/// Dropping the stream closes the underlying socket.
	fn get_transaction_stream(&self, address: &str) -> FeedStream;
}

/// Endpoints and timings of the indexer client
#[derive(Debug, Clone)]
pub struct IndexerConfig {
	/// REST base URL
	pub base_url: String,
	/// Websocket base URL, the feed connects to `{ws_url}/v1`
	pub ws_url: String,
	/// Cap of the session bootstrap and reconnection backoff
	pub backoff_max: Duration,
	/// Timeout of a websocket handshake
	pub connect_timeout: Duration,
}

impl IndexerConfig {
	pub fn from_sync_config(config: &SyncConfig) -> Self {
		Self {
			base_url: config.indexer_url.trim_end_matches('/').to_string(),
			ws_url: config.indexer_ws_url(),
			backoff_max: config.session_backoff_max(),
			connect_timeout: Duration::from_secs(20),
		}
	}

	/// Backoff shared by the session bootstrap and socket reconnections
	pub(crate) fn backoff(&self) -> ExponentialBuilder {
		ExponentialBuilder::default()
			.with_min_delay(Duration::from_millis(100))
			.with_max_delay(self.backoff_max)
			.with_jitter()
			.without_max_times()
	}
}

/// REST and websocket client of the transaction indexer
#[derive(Clone)]
pub struct IndexerClient {
	http: ClientWithMiddleware,
	config: IndexerConfig,
	bus: EventBus,
	session: Arc<OnceCell<String>>,
}

impl IndexerClient {
	/// Creates a client, no request is made until the session is needed
	pub fn new(config: IndexerConfig, bus: EventBus) -> Result<Self, IndexerError> {
		let base_client = reqwest::ClientBuilder::new()
			.timeout(Duration::from_secs(30))
			.connect_timeout(Duration::from_secs(20))
			.build()?;
		let retry_config = HttpRetryConfig::capped(3, config.backoff_max);
		let http = create_retryable_http_client::<DefaultRetryableStrategy>(
			&retry_config,
			base_client,
			None,
		);

		Ok(Self {
			http,
			config,
			bus,
			session: Arc::new(OnceCell::new()),
		})
	}

	pub fn config(&self) -> &IndexerConfig {
		&self.config
	}

	pub(crate) fn bus(&self) -> &EventBus {
		&self.bus
	}

	/// Returns the session cookie, bootstrapping the session on first use
	///
	/// Concurrent callers share a single bootstrap.
	pub async fn ensure_session(&self) -> Result<String, IndexerError> {
		self.session
			.get_or_try_init(|| async {
				let cookie = (|| async { self.fetch_session_cookie().await })
					.retry(self.config.backoff())
					.notify(|e: &IndexerError, delay: Duration| {
						warn!(delay = ?delay, "Failed to get indexer cookie: {}", e);
					})
					.await?;
				info!("Got indexer cookie");
				Ok::<_, IndexerError>(cookie)
			})
			.await
			.cloned()
	}

	/// Queries the best block once and returns the cookie it sets
	async fn fetch_session_cookie(&self) -> Result<String, IndexerError> {
		let url = format!("{}/blocks/best", self.config.base_url);
		let response = self.http.get(&url).send().await?;

		if !response.status().is_success() {
			return Err(IndexerError::session_error(format!(
				"Best block request failed with status {}",
				response.status()
			)));
		}

		let cookie = response
			.headers()
			.get_all(SET_COOKIE)
			.iter()
			.filter_map(|value| value.to_str().ok())
			.filter_map(|value| value.split(';').next())
			.map(str::trim)
			.filter(|pair| !pair.is_empty())
			.collect::<Vec<_>>()
			.join("; ");

		let best: Value = response.json().await?;
		let valid = best.get("number").is_some_and(|n| !n.is_null())
			&& best.get("hash").is_some_and(|h| !h.is_null());
		if !valid {
			return Err(IndexerError::data_error(
				"Indexer response is invalid for best block",
			));
		}

		Ok(cookie)
	}
}

#[async_trait]
impl IndexerApi for IndexerClient {
	async fn get_transactions(
		&self,
		from_block: u64,
		to_block: u64,
		address: &str,
	) -> Result<Vec<String>, IndexerError> {
		let url = format!("{}/addresses/{}/transactions", self.config.base_url, address);
		let mut request = self.http.get(&url).query(&[
			("from", from_block.to_string()),
			("to", to_block.to_string()),
		]);
		if let Some(cookie) = self.session.get().filter(|c| !c.is_empty()) {
			request = request.header(COOKIE, cookie.as_str());
		}

		let response = request.send().await?;
		if !response.status().is_success() {
			return Err(IndexerError::request_error(format!(
				"Transactions request for {} failed with status {}",
				address,
				response.status()
			)));
		}

		let body: Value = response.json().await?;
		let hashes = body
			.as_array()
			.and_then(|items| {
				items
					.iter()
					.map(|item| item.as_str().map(str::to_string))
					.collect::<Option<Vec<_>>>()
			})
			.ok_or_else(|| {
				IndexerError::data_error(format!("Indexer response is invalid for {}", address))
			})?;

		debug!(
			address = %address,
			from_block = from_block,
			to_block = to_block,
			count = hashes.len(),
			"past transactions retrieved"
		);
		Ok(hashes)
	}

	fn get_transaction_stream(&self, address: &str) -> FeedStream {
		feed::spawn_feed(self.clone(), address.to_string())
	}
}
