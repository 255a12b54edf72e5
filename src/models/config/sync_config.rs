//! Synchronization engine configuration.
//!
//! Every field has a default so a config file only needs the endpoints.
//! Environment variables prefixed with `SYNC_` override file values.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::models::config::{ConfigError, ConfigLoader};

/// Endpoints and tuning knobs of the synchronization engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
	/// JSON-RPC endpoint of the chain node
	pub rpc_url: String,

	/// Base URL of the transaction indexer REST API
	pub indexer_url: String,

	/// Websocket base URL of the indexer, derived from `indexer_url` when absent
	pub indexer_ws_url: Option<String>,

	pub chain_id: u64,
	pub display_name: String,
	pub symbol: String,

	/// Quiet period before a per-address flush of the consolidation queue
	pub debounce_ms: u64,

	/// Silence after which the head tracker polls for the latest block
	pub head_probe_interval_secs: u64,

	/// Polling cadence of filter based subscriptions
	pub head_poll_interval_ms: u64,

	/// Maximum number of blocks queried per event window
	pub scan_window_blocks: u64,

	/// Number of event descriptors scanned concurrently
	pub scan_concurrency: usize,

	/// Absolute timeout of a single window fetch
	pub window_timeout_secs: u64,

	/// Cap of the indexer session bootstrap backoff
	pub session_backoff_max_ms: u64,

	/// Attempts made when the explorer answers 404 during a flush
	pub not_found_retries: usize,

	/// Initial delay between 404 retries
	pub not_found_backoff_ms: u64,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			rpc_url: "http://localhost:8545".to_string(),
			indexer_url: "http://localhost:3005".to_string(),
			indexer_ws_url: None,
			chain_id: 1,
			display_name: "Ether".to_string(),
			symbol: "ETH".to_string(),
			debounce_ms: 300,
			head_probe_interval_secs: 120,
			head_poll_interval_ms: 2000,
			scan_window_blocks: 4000,
			scan_concurrency: 3,
			window_timeout_secs: 120,
			session_backoff_max_ms: 5000,
			not_found_retries: 5,
			not_found_backoff_ms: 250,
		}
	}
}

impl SyncConfig {
	/// Websocket base URL of the indexer
	///
	/// Falls back to `indexer_url` with its scheme switched to `ws`/`wss`.
	pub fn indexer_ws_url(&self) -> String {
		if let Some(url) = &self.indexer_ws_url {
			return url.trim_end_matches('/').to_string();
		}
		let base = self.indexer_url.trim_end_matches('/');
		if let Some(rest) = base.strip_prefix("https://") {
			format!("wss://{}", rest)
		} else if let Some(rest) = base.strip_prefix("http://") {
			format!("ws://{}", rest)
		} else {
			base.to_string()
		}
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn head_probe_interval(&self) -> Duration {
		Duration::from_secs(self.head_probe_interval_secs)
	}

	pub fn head_poll_interval(&self) -> Duration {
		Duration::from_millis(self.head_poll_interval_ms)
	}

	pub fn window_timeout(&self) -> Duration {
		Duration::from_secs(self.window_timeout_secs)
	}

	pub fn session_backoff_max(&self) -> Duration {
		Duration::from_millis(self.session_backoff_max_ms)
	}

	pub fn not_found_backoff(&self) -> Duration {
		Duration::from_millis(self.not_found_backoff_ms)
	}

	/// Applies `SYNC_*` environment overrides on top of the loaded values
	pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
		self.apply_overrides(|key| std::env::var(key).ok())
	}

	fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(url) = lookup("SYNC_RPC_URL") {
			self.rpc_url = url;
		}
		if let Some(url) = lookup("SYNC_INDEXER_URL") {
			self.indexer_url = url;
		}
		if let Some(url) = lookup("SYNC_INDEXER_WS_URL") {
			self.indexer_ws_url = Some(url);
		}
		if let Some(raw) = lookup("SYNC_DEBOUNCE_MS") {
			self.debounce_ms = raw
				.parse()
				.map_err(|e| ConfigError::environment_error("SYNC_DEBOUNCE_MS", format!("{}", e)))?;
		}
		if let Some(raw) = lookup("SYNC_SCAN_CONCURRENCY") {
			self.scan_concurrency = raw.parse().map_err(|e| {
				ConfigError::environment_error("SYNC_SCAN_CONCURRENCY", format!("{}", e))
			})?;
		}
		Ok(())
	}
}

impl ConfigLoader for SyncConfig {
	fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
		if !Self::is_json_file(path) {
			return Err(ConfigError::file_error(format!(
				"{} is not a JSON file",
				path.display()
			)));
		}

		let file = std::fs::File::open(path)?;
		let config: SyncConfig = serde_json::from_reader(file)?;

		// Validate the config after loading
		if let Err(validation_error) = config.validate() {
			return Err(ConfigError::validation_error(validation_error));
		}

		Ok(config)
	}

	fn validate(&self) -> Result<(), String> {
		let is_http = |url: &str| url.starts_with("http://") || url.starts_with("https://");

		if !is_http(&self.rpc_url) {
			return Err("rpc_url must start with http:// or https://".to_string());
		}

		if !is_http(&self.indexer_url) {
			return Err("indexer_url must start with http:// or https://".to_string());
		}

		if let Some(ws_url) = &self.indexer_ws_url {
			if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
				return Err("indexer_ws_url must start with ws:// or wss://".to_string());
			}
		}

		if self.debounce_ms == 0 {
			return Err("debounce_ms must be greater than 0".to_string());
		}

		if self.scan_window_blocks == 0 {
			return Err("scan_window_blocks must be greater than 0".to_string());
		}

		if self.scan_concurrency == 0 {
			return Err("scan_concurrency must be greater than 0".to_string());
		}

		if self.window_timeout_secs == 0 {
			return Err("window_timeout_secs must be greater than 0".to_string());
		}

		if self.head_probe_interval_secs == 0 {
			return Err("head_probe_interval_secs must be greater than 0".to_string());
		}

		Ok(())
	}
}
