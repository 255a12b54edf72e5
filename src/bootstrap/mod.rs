//! Bootstrap module for initializing services.
//!
//! Builds the synchronization engine from a [`SyncConfig`]:
//!
//! - `load_config`: reads the config file (or defaults) and applies `SYNC_*` overrides
//! - `initialize_services`: creates the chain adapter, the indexer client and every
//!   synchronization component, and wires them into a [`SyncOrchestrator`]
//! - `spawn_event_logger`: mirrors bus traffic into the application log

use std::{path::Path, sync::Arc};

use thiserror::Error;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
	models::{ConfigError, ConfigLoader, SyncConfig},
	services::{
		blockchain::{BlockChainError, CoinAdapter, EvmCoinAdapter, HttpTransportClient},
		blockwatcher::ChainHeadTracker,
		bus::EventBus,
		indexer::{IndexerApi, IndexerClient, IndexerConfig, IndexerError},
		queue::{ConsolidationQueue, QueueConfig},
		registry::EventRegistry,
		scanner::{ChunkedScanner, ScannerConfig},
		sync::{SyncComponents, SyncOptions, SyncOrchestrator},
	},
	utils::http::HttpRetryConfig,
};

/// Errors raised while assembling the engine
#[derive(Debug, Error)]
pub enum BootstrapError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Chain client error: {0}")]
	Chain(#[from] BlockChainError),

	#[error("Indexer client error: {0}")]
	Indexer(#[from] IndexerError),
}

/// Type alias for handling bootstrap results
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Loads the engine configuration
///
/// Without a path the defaults are used. Environment overrides are applied
/// last and the result is validated again.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
	let mut config = match path {
		Some(path) => SyncConfig::load_from_path(path)?,
		None => SyncConfig::default(),
	};
	config.apply_env_overrides()?;
	config.validate().map_err(ConfigError::validation_error)?;
	Ok(config)
}

/// Initializes all services required to synchronize wallets
///
/// Nothing is contacted until an operation of the returned orchestrator runs.
pub fn initialize_services(config: &SyncConfig) -> Result<SyncOrchestrator> {
	let bus = EventBus::new();

	let transport = HttpTransportClient::new(&config.rpc_url, &HttpRetryConfig::default())?;
	let adapter: Arc<dyn CoinAdapter> = Arc::new(EvmCoinAdapter::new(
		transport,
		config.head_poll_interval(),
	));
	let indexer: Arc<dyn IndexerApi> = Arc::new(IndexerClient::new(
		IndexerConfig::from_sync_config(config),
		bus.clone(),
	)?);

	Ok(assemble(adapter, indexer, bus, config))
}

/// Wires already constructed clients into an orchestrator
pub fn assemble(
	adapter: Arc<dyn CoinAdapter>,
	indexer: Arc<dyn IndexerApi>,
	bus: EventBus,
	config: &SyncConfig,
) -> SyncOrchestrator {
	let queue = ConsolidationQueue::new(
		adapter.clone(),
		bus.clone(),
		QueueConfig::from_sync_config(config),
	);
	let tracker = Arc::new(ChainHeadTracker::new(
		adapter.clone(),
		bus.clone(),
		config.head_probe_interval(),
	));
	let scanner = Arc::new(ChunkedScanner::new(
		adapter.clone(),
		indexer.clone(),
		ScannerConfig::from_sync_config(config),
	));

	info!(
		rpc_url = %config.rpc_url,
		indexer_url = %config.indexer_url,
		chain_id = config.chain_id,
		"synchronization services initialized"
	);

	SyncOrchestrator::new(
		SyncComponents {
			adapter,
			indexer,
			registry: EventRegistry::new(),
			queue,
			tracker,
			scanner,
			bus,
		},
		SyncOptions::from_sync_config(config),
	)
}

/// Logs every state update and wallet error published on the bus
///
/// The task ends when the bus is dropped.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
	let mut states = bus.subscribe_wallet_state();
	let mut errors = bus.subscribe_wallet_errors();
	let mut connections = bus.subscribe_connection_status();

	tokio::spawn(async move {
		loop {
			tokio::select! {
				state = states.recv() => match state {
					Ok(state) => info!(
						wallet_id = %state.wallet_id,
						address = %state.address,
						transactions = state.transaction_count(),
						"wallet state changed"
					),
					Err(RecvError::Lagged(skipped)) => warn!(skipped, "state log lagged"),
					Err(RecvError::Closed) => break,
				},
				error = errors.recv() => match error {
					Ok(error) => warn!(
						plugin = %error.plugin,
						inner = %error.inner,
						"{}",
						error.message
					),
					Err(RecvError::Lagged(skipped)) => warn!(skipped, "error log lagged"),
					Err(RecvError::Closed) => break,
				},
				status = connections.recv() => match status {
					Ok(status) => debug!(connected = status.connected, "indexer connection status"),
					Err(RecvError::Lagged(_)) => {}
					Err(RecvError::Closed) => break,
				},
			}
		}
	})
}
