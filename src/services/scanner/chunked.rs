//! Windowed range scans of past transactions and events.
//!
//! Transactions are fetched from the indexer in a single call per range.
//! Events are fetched per descriptor in fixed size windows, one window at a
//! time for a descriptor and at most `concurrency` descriptors at once. Every
//! fetch is bounded by `window_timeout` and aborted when the scanner is
//! cancelled.

use std::{future::Future, sync::Arc, time::Duration};

use futures::{future, stream, StreamExt};
use tokio::{sync::watch, time::timeout};
use tracing::{debug, info, instrument, warn};

use crate::{
	models::{EventDescriptor, RawEvent, SyncConfig},
	services::{
		blockchain::{CoinAdapter, EventQuery},
		indexer::IndexerApi,
		scanner::ScannerError,
	},
	utils::metrics::SCAN_WINDOWS,
};

/// Called with the descriptor position and the last block of every completed window
pub type ScanProgress = Arc<dyn Fn(usize, u64) + Send + Sync>;

/// Limits applied to historical scans
#[derive(Debug, Clone)]
pub struct ScannerConfig {
	/// Number of blocks per event window
	pub window_blocks: u64,
	/// Descriptors scanned concurrently
	pub concurrency: usize,
	/// Absolute timeout of a single fetch
	pub window_timeout: Duration,
}

impl Default for ScannerConfig {
	fn default() -> Self {
		Self {
			window_blocks: 4000,
			concurrency: 3,
			window_timeout: Duration::from_secs(120),
		}
	}
}

impl ScannerConfig {
	pub fn from_sync_config(config: &SyncConfig) -> Self {
		Self {
			window_blocks: config.scan_window_blocks,
			concurrency: config.scan_concurrency,
			window_timeout: config.window_timeout(),
		}
	}
}

/// Result of scanning one descriptor
///
/// `events` holds everything fetched before a failure, so partial progress
/// survives a window that failed later on.
#[derive(Debug)]
pub struct DescriptorScan {
	/// Position of the descriptor in the scanned list
	pub index: usize,
	pub descriptor: EventDescriptor,
	pub events: Vec<RawEvent>,
	/// Last block covered on success
	pub outcome: Result<u64, ScannerError>,
}

/// Splits an inclusive block range into inclusive windows of `window` blocks
///
/// An inverted range yields no window.
pub fn split_windows(from_block: u64, to_block: u64, window: u64) -> Vec<(u64, u64)> {
	let window = window.max(1);
	let mut windows = Vec::new();
	let mut start = from_block;
	while start <= to_block {
		let end = start.saturating_add(window - 1).min(to_block);
		windows.push((start, end));
		if end == u64::MAX {
			break;
		}
		start = end + 1;
	}
	windows
}

/// Bounded historical scanner
pub struct ChunkedScanner {
	adapter: Arc<dyn CoinAdapter>,
	indexer: Arc<dyn IndexerApi>,
	config: ScannerConfig,
	shutdown: watch::Sender<bool>,
}

impl ChunkedScanner {
	pub fn new(
		adapter: Arc<dyn CoinAdapter>,
		indexer: Arc<dyn IndexerApi>,
		config: ScannerConfig,
	) -> Self {
		let (shutdown, _) = watch::channel(false);
		Self {
			adapter,
			indexer,
			config,
			shutdown,
		}
	}

	pub fn config(&self) -> &ScannerConfig {
		&self.config
	}

	/// Aborts every pending and future fetch with [`ScannerError::Cancelled`]
	pub fn cancel(&self) {
		if !self.shutdown.send_replace(true) {
			info!("historical scans cancelled");
		}
	}

	pub fn is_cancelled(&self) -> bool {
		*self.shutdown.borrow()
	}

	/// Returns the hashes of the transactions involving `address` in a range
	#[instrument(skip(self))]
	pub async fn scan_transactions(
		&self,
		address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<String>, ScannerError> {
		let fetch = async {
			self.indexer
				.get_transactions(from_block, to_block, address)
				.await
				.map_err(ScannerError::from)
		};
		let hashes = self
			.guarded(format!("transactions {}..{}", from_block, to_block), fetch)
			.await?;
		debug!(count = hashes.len(), "transaction scan complete");
		Ok(hashes)
	}

	/// Returns the past events of every descriptor in a range
	///
	/// Descriptors whose event is missing from their ABI are skipped and
	/// produce no entry.
	pub async fn scan_events(
		&self,
		descriptors: Vec<EventDescriptor>,
		from_block: u64,
		to_block: u64,
		progress: Option<ScanProgress>,
	) -> Vec<DescriptorScan> {
		stream::iter(descriptors.into_iter().enumerate())
			.map(|(index, descriptor)| {
				self.scan_descriptor(index, descriptor, from_block, to_block, progress.clone())
			})
			.buffer_unordered(self.config.concurrency.max(1))
			.filter_map(future::ready)
			.collect()
			.await
	}

	async fn scan_descriptor(
		&self,
		index: usize,
		descriptor: EventDescriptor,
		from_block: u64,
		to_block: u64,
		progress: Option<ScanProgress>,
	) -> Option<DescriptorScan> {
		let Some(schema) = descriptor.event_schema().cloned() else {
			debug!(
				contract = %descriptor.contract_address,
				event = %descriptor.event_name,
				"event not declared by contract ABI, skipping"
			);
			return None;
		};

		let (from_block, to_block) = descriptor.clamp_range(from_block, to_block);
		let mut events = Vec::new();

		for (window_from, window_to) in
			split_windows(from_block, to_block, self.config.window_blocks)
		{
			let query = EventQuery::range(window_from, window_to, descriptor.filter.clone());
			let fetch = async {
				self.adapter
					.get_past_events(
						&schema,
						&descriptor.contract_address,
						&descriptor.event_name,
						query,
					)
					.await
					.map_err(ScannerError::from)
			};
			let label = format!(
				"{} {} {}..{}",
				descriptor.event_name, descriptor.contract_address, window_from, window_to
			);

			match self.guarded(label, fetch).await {
				Ok(batch) => {
					SCAN_WINDOWS.inc();
					debug!(
						event = %descriptor.event_name,
						window = ?(window_from, window_to),
						count = batch.len(),
						"event window scanned"
					);
					events.extend(batch);
					if let Some(progress) = &progress {
						progress(index, window_to);
					}
				}
				Err(e) => {
					warn!(
						event = %descriptor.event_name,
						window = ?(window_from, window_to),
						"event scan stopped: {}",
						e
					);
					return Some(DescriptorScan {
						index,
						descriptor,
						events,
						outcome: Err(e),
					});
				}
			}
		}

		Some(DescriptorScan {
			index,
			descriptor,
			events,
			outcome: Ok(to_block),
		})
	}

	/// Runs a fetch under the window timeout and the cancellation signal
	async fn guarded<T, F>(&self, label: String, fetch: F) -> Result<T, ScannerError>
	where
		F: Future<Output = Result<T, ScannerError>>,
	{
		let shutdown = self.shutdown.subscribe();
		if *shutdown.borrow() {
			return Err(ScannerError::cancelled(label));
		}

		tokio::select! {
			_ = cancelled(shutdown) => Err(ScannerError::cancelled(label)),
			result = timeout(self.config.window_timeout, fetch) => match result {
				Ok(result) => result,
				Err(_) => Err(ScannerError::timeout(format!(
					"{} exceeded {:?}",
					label, self.config.window_timeout
				))),
			},
		}
	}
}

async fn cancelled(mut shutdown: watch::Receiver<bool>) {
	loop {
		if *shutdown.borrow_and_update() {
			return;
		}
		if shutdown.changed().await.is_err() {
			future::pending::<()>().await;
		}
	}
}
