//! Chain-head tracker.
//!
//! The tracker fetches the current head as soon as it starts, then follows the
//! adapter's new-head stream. When no head arrives within the probe interval
//! it polls the latest block and publishes it as if it had been pushed; silence
//! is treated as a connectivity problem to route around. Every observed head
//! is published as `coin-block`, duplicates included.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
	models::BlockHeader,
	services::{
		blockchain::CoinAdapter, blockwatcher::BlockWatcherError, bus::EventBus,
	},
	utils::metrics::LATEST_BLOCK,
};

/// Name reported in `wallet-error` events raised by the tracker
pub const HEAD_TRACKER_PLUGIN: &str = "eth-blocks";

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Follows the chain head and publishes every observed block
pub struct ChainHeadTracker {
	adapter: Arc<dyn CoinAdapter>,
	bus: EventBus,
	probe_interval: Duration,
	head: Arc<watch::Sender<Option<BlockHeader>>>,
	task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChainHeadTracker {
	/// Creates a tracker
	///
	/// # Arguments
	/// * `adapter` - Source of heads
	/// * `bus` - Bus receiving `coin-block` and `wallet-error` events
	/// * `probe_interval` - Silence after which the latest block is polled
	pub fn new(adapter: Arc<dyn CoinAdapter>, bus: EventBus, probe_interval: Duration) -> Self {
		let (head, _) = watch::channel(None);
		Self {
			adapter,
			bus,
			probe_interval,
			head: Arc::new(head),
			task: std::sync::Mutex::new(None),
		}
	}

	/// Starts following the chain, a no-op when already running
	pub fn start(&self) {
		let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
		if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return;
		}

		info!(probe_interval = ?self.probe_interval, "starting chain head tracker");
		*task = Some(tokio::spawn(run(
			self.adapter.clone(),
			self.bus.clone(),
			self.head.clone(),
			self.probe_interval,
		)));
	}

	/// Stops following the chain
	pub fn stop(&self) {
		let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(handle) = task.take() {
			handle.abort();
			info!("chain head tracker stopped");
		}
	}

	/// Latest head observed, if any
	pub fn latest(&self) -> Option<BlockHeader> {
		self.head.borrow().clone()
	}

	/// Waits until the first head has been observed
	pub async fn wait_for_first_head(&self) -> Result<BlockHeader, BlockWatcherError> {
		let mut receiver = self.head.subscribe();
		let head = receiver
			.wait_for(Option::is_some)
			.await
			.map_err(|e| BlockWatcherError::stopped_error(e.to_string()))?;
		head.clone()
			.ok_or_else(|| BlockWatcherError::stopped_error("no head observed"))
	}
}

impl Drop for ChainHeadTracker {
	fn drop(&mut self) {
		self.stop();
	}
}

async fn run(
	adapter: Arc<dyn CoinAdapter>,
	bus: EventBus,
	head: Arc<watch::Sender<Option<BlockHeader>>>,
	probe_interval: Duration,
) {
	probe(adapter.as_ref(), &bus, &head).await;

	let mut heads = adapter.subscribe_new_heads();
	loop {
		match timeout(probe_interval, heads.next()).await {
			Ok(Some(Ok(header))) => observe(&bus, &head, header),
			Ok(Some(Err(e))) => {
				bus.publish_wallet_error(HEAD_TRACKER_PLUGIN, "Could not get latest block", e)
			}
			Ok(None) => {
				warn!("new head subscription ended, resubscribing");
				tokio::time::sleep(RESUBSCRIBE_DELAY).await;
				heads = adapter.subscribe_new_heads();
				probe(adapter.as_ref(), &bus, &head).await;
			}
			Err(_) => {
				debug!(probe_interval = ?probe_interval, "no new head received, polling latest block");
				probe(adapter.as_ref(), &bus, &head).await;
			}
		}
	}
}

async fn probe(
	adapter: &dyn CoinAdapter,
	bus: &EventBus,
	head: &watch::Sender<Option<BlockHeader>>,
) {
	match adapter.get_latest_block().await {
		Ok(header) => observe(bus, head, header),
		Err(e) => bus.publish_wallet_error(HEAD_TRACKER_PLUGIN, "Could not get latest block", e),
	}
}

fn observe(bus: &EventBus, head: &watch::Sender<Option<BlockHeader>>, header: BlockHeader) {
	debug!(block = header.number, hash = %header.hash, "new chain head");
	LATEST_BLOCK.set(header.number as f64);
	head.send_replace(Some(header.clone()));
	bus.publish_block(header);
}
