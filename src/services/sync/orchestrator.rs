//! Sync orchestrator.
//!
//! Wires the head tracker, the realtime feed, the event subscriptions, the
//! historical scanner and the resync cursors into the public synchronization
//! operations. Every collaborator is injected through [`SyncComponents`].

use std::{
	future::Future,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
};

use futures::{
	future::{join_all, try_join_all},
	StreamExt,
};
use tokio::{
	sync::broadcast::{self, error::RecvError},
	task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

use crate::{
	models::{
		AddressUpdate, BlockHeader, DescriptorFactory, EventDescriptor, EvmReceipt, Meta,
		MetaParser, RawEvent, SyncConfig,
	},
	services::{
		blockchain::{hash_to_string, CoinAdapter, EventQuery, EventStream},
		blockwatcher::ChainHeadTracker,
		bus::EventBus,
		indexer::{FeedEvent, FeedStream, IndexerApi, INDEXER_PLUGIN},
		queue::{Completion, ConsolidationQueue},
		registry::EventRegistry,
		resync::{SyncCursor, TickOutcome},
		scanner::{ChunkedScanner, ScanProgress, ScannerError},
		sync::{try_parse_event_log, LoggedTransaction, Submission, SyncError},
	},
};

/// Name reported in `wallet-error` events raised by event subscriptions
pub const EVENTS_PLUGIN: &str = "eth-events";

/// Name reported in `wallet-error` events raised by the balance watcher
pub const BALANCE_PLUGIN: &str = "eth-balance";

/// Display settings of the synced coin
#[derive(Debug, Clone)]
pub struct SyncOptions {
	pub display_name: String,
	pub symbol: String,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			display_name: "Ether".to_string(),
			symbol: "ETH".to_string(),
		}
	}
}

impl SyncOptions {
	pub fn from_sync_config(config: &SyncConfig) -> Self {
		Self {
			display_name: config.display_name.clone(),
			symbol: config.symbol.clone(),
		}
	}
}

/// Collaborators of the orchestrator
#[derive(Clone)]
pub struct SyncComponents {
	pub adapter: Arc<dyn CoinAdapter>,
	pub indexer: Arc<dyn IndexerApi>,
	pub registry: EventRegistry,
	pub queue: ConsolidationQueue,
	pub tracker: Arc<ChainHeadTracker>,
	pub scanner: Arc<ChunkedScanner>,
	pub bus: EventBus,
}

/// Entry point of the synchronization engine
pub struct SyncOrchestrator {
	adapter: Arc<dyn CoinAdapter>,
	indexer: Arc<dyn IndexerApi>,
	registry: EventRegistry,
	queue: ConsolidationQueue,
	tracker: Arc<ChainHeadTracker>,
	scanner: Arc<ChunkedScanner>,
	bus: EventBus,
	options: SyncOptions,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	stopped: AtomicBool,
}

impl SyncOrchestrator {
	pub fn new(components: SyncComponents, options: SyncOptions) -> Self {
		let SyncComponents {
			adapter,
			indexer,
			registry,
			queue,
			tracker,
			scanner,
			bus,
		} = components;
		Self {
			adapter,
			indexer,
			registry,
			queue,
			tracker,
			scanner,
			bus,
			options,
			tasks: Mutex::new(Vec::new()),
			stopped: AtomicBool::new(false),
		}
	}

	pub fn bus(&self) -> &EventBus {
		&self.bus
	}

	pub fn queue(&self) -> &ConsolidationQueue {
		&self.queue
	}

	/// Registers a contract event to watch for every synced address
	pub fn register_event(&self, factory: DescriptorFactory) {
		self.registry.register(factory);
	}

	/// Enqueues a bare transaction hash
	pub fn add_transaction(&self, address: &str, meta: Option<Meta>, hash: &str) -> Completion {
		self.queue.add_transaction(address, meta, hash)
	}

	/// Enqueues a decoded contract event
	pub fn add_event(
		&self,
		address: &str,
		meta_parser: MetaParser,
		raw_event: RawEvent,
	) -> Completion {
		self.queue.add_event(address, meta_parser, raw_event)
	}

	fn ensure_running(&self) -> Result<(), SyncError> {
		if self.stopped.load(Ordering::SeqCst) {
			return Err(SyncError::stopped_error("engine stopped"));
		}
		Ok(())
	}

	fn spawn<F>(&self, task: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
		let handle = tokio::spawn(task);
		if self.stopped.load(Ordering::SeqCst) {
			handle.abort();
			return;
		}
		tasks.retain(|task| !task.is_finished());
		tasks.push(handle);
	}

	/// Starts synchronizing an address
	///
	/// Waits for the first chain head, subscribes the realtime feed and every
	/// registered event, and backfills from `from_block` to that head. Returns
	/// the head reached, which callers persist as their new watermark, once the
	/// backfilled transactions were emitted. A rejected emission fails the
	/// call. The subscriptions keep running until [`SyncOrchestrator::stop`].
	#[instrument(skip(self))]
	pub async fn sync_transactions(&self, from_block: u64, address: &str) -> Result<u64, SyncError> {
		self.ensure_running()?;
		self.tracker.start();
		let head = self.tracker.wait_for_first_head().await?;
		info!(head = head.number, "starting synchronization");

		let tx_cursor = Arc::new(SyncCursor::new(
			format!("{}-txs", self.options.symbol.to_lowercase()),
			from_block,
		));
		self.spawn(follow_feed(
			self.indexer.get_transaction_stream(address),
			self.queue.clone(),
			self.bus.clone(),
			tx_cursor.clone(),
			address.to_string(),
			self.feed_failure_message(),
		));

		let descriptors = self.watchable_descriptors(address);
		let event_cursors: Vec<Arc<SyncCursor>> = descriptors
			.iter()
			.map(|descriptor| {
				Arc::new(SyncCursor::new(
					descriptor.event_name.clone(),
					descriptor.min_block.max(from_block),
				))
			})
			.collect();

		for (descriptor, cursor) in descriptors.iter().zip(&event_cursors) {
			let Some(schema) = descriptor.event_schema() else {
				continue;
			};
			let events = self.adapter.subscribe_to_events(
				schema,
				&descriptor.contract_address,
				&descriptor.event_name,
				EventQuery {
					filter: descriptor.filter.clone(),
					..Default::default()
				},
			);
			self.spawn(follow_events(
				events,
				descriptor.clone(),
				cursor.clone(),
				self.queue.clone(),
				self.bus.clone(),
				address.to_string(),
			));
		}

		// ticks observed during the backfill stay buffered until the drivers start
		let tx_ticks = self.bus.subscribe_blocks();
		let event_ticks: Vec<_> = descriptors
			.iter()
			.map(|_| self.bus.subscribe_blocks())
			.collect();

		let progress: ScanProgress = {
			let cursors = event_cursors.clone();
			Arc::new(move |index: usize, block_number: u64| {
				if let Some(cursor) = cursors.get(index) {
					cursor.advance_to(block_number);
				}
			})
		};
		let (transactions, scans) = tokio::join!(
			self.scanner
				.scan_transactions(address, from_block, head.number),
			self.scanner.scan_events(
				descriptors.clone(),
				from_block,
				head.number,
				Some(progress)
			),
		);

		let mut completions = Vec::new();
		match transactions {
			Ok(hashes) => {
				completions.extend(self.enqueue_hashes(address, &hashes));
				tx_cursor.advance_to(head.number);
			}
			Err(ScannerError::Cancelled(reason)) => return Err(SyncError::stopped_error(reason)),
			Err(e) => {
				self.bus
					.publish_wallet_error(INDEXER_PLUGIN, &self.feed_failure_message(), e);
				tx_cursor.request_resync();
			}
		}

		for scan in scans {
			for raw_event in scan.events {
				completions.push(self.queue.add_event(
					address,
					scan.descriptor.meta_parser.clone(),
					raw_event,
				));
			}
			let cursor = &event_cursors[scan.index];
			match scan.outcome {
				Ok(_) => cursor.advance_to(head.number),
				Err(ScannerError::Cancelled(reason)) => {
					return Err(SyncError::stopped_error(reason))
				}
				Err(e) => {
					self.bus.publish_wallet_error(
						EVENTS_PLUGIN,
						&events_failure_message(&scan.descriptor),
						e,
					);
					cursor.request_resync();
				}
			}
		}

		self.spawn(drive_cursor(
			tx_ticks,
			tx_cursor,
			self.bus.clone(),
			INDEXER_PLUGIN,
			self.feed_failure_message(),
			{
				let scanner = self.scanner.clone();
				let queue = self.queue.clone();
				let address = address.to_string();
				move |from_block, to_block| {
					let scanner = scanner.clone();
					let queue = queue.clone();
					let address = address.clone();
					async move {
						let hashes = scanner
							.scan_transactions(&address, from_block, to_block)
							.await?;
						for hash in hashes {
							let _ = queue.add_transaction(&address, None, &hash);
						}
						Ok::<(), ScannerError>(())
					}
				}
			},
		));

		for ((descriptor, cursor), ticks) in descriptors.into_iter().zip(event_cursors).zip(event_ticks)
		{
			let message = events_failure_message(&descriptor);
			let scanner = self.scanner.clone();
			let queue = self.queue.clone();
			let address = address.to_string();
			self.spawn(drive_cursor(
				ticks,
				cursor,
				self.bus.clone(),
				EVENTS_PLUGIN,
				message,
				move |from_block, to_block| {
					let scanner = scanner.clone();
					let queue = queue.clone();
					let address = address.clone();
					let descriptor = descriptor.clone();
					async move {
						let scans = scanner
							.scan_events(vec![descriptor], from_block, to_block, None)
							.await;
						for scan in scans {
							for raw_event in scan.events {
								let _ = queue.add_event(
									&address,
									scan.descriptor.meta_parser.clone(),
									raw_event,
								);
							}
							scan.outcome?;
						}
						Ok::<(), ScannerError>(())
					}
				},
			));
		}

		settle_backfill(completions).await?;
		info!(head = head.number, "synchronization started");
		Ok(head.number)
	}

	/// Re-derives the notifications of one transaction
	///
	/// Enqueues the hash when the address sent or received the transaction,
	/// and every receipt log matching a registered event. Resolves once all
	/// of them have been emitted.
	#[instrument(skip(self))]
	pub async fn refresh_transaction(&self, hash: &str, address: &str) -> Result<(), SyncError> {
		self.ensure_running()?;
		let Some(receipt) = self.adapter.get_transaction_receipt(hash).await? else {
			debug!("no receipt yet, nothing to refresh");
			return Ok(());
		};

		let owner = self.adapter.to_checksum_address(address)?;
		let is_owner = |party: String| {
			self.adapter
				.to_checksum_address(&party)
				.is_ok_and(|checksum| checksum == owner)
		};

		let mut completions = Vec::new();
		if is_owner(receipt.from.to_string())
			|| receipt.to.is_some_and(|to| is_owner(to.to_string()))
		{
			completions.push(self.queue.add_transaction(address, None, hash));
		}

		let descriptors = self.registry.descriptors_for(address);
		for log in &receipt.logs {
			for (descriptor, raw_event) in
				try_parse_event_log(self.adapter.as_ref(), &descriptors, log, hash)
			{
				completions.push(self.queue.add_event(
					address,
					descriptor.meta_parser.clone(),
					raw_event,
				));
			}
		}

		debug!(notifications = completions.len(), "refreshing transaction");
		try_join_all(completions).await?;
		Ok(())
	}

	/// Re-scans the whole chain for an address and returns the head reached
	#[instrument(skip(self))]
	pub async fn refresh_all_transactions(&self, address: &str) -> Result<u64, SyncError> {
		self.ensure_running()?;
		let head = match self.tracker.latest() {
			Some(head) => head,
			None => self.adapter.get_latest_block().await?,
		};
		info!(head = head.number, "rebuilding transaction history");

		let descriptors = self.watchable_descriptors(address);
		let (transactions, scans) = tokio::join!(
			self.scanner.scan_transactions(address, 0, head.number),
			self.scanner.scan_events(descriptors, 0, head.number, None),
		);

		let mut failure = None;
		let mut completions = Vec::new();
		match transactions {
			Ok(hashes) => completions.extend(self.enqueue_hashes(address, &hashes)),
			Err(e) => failure = Some(e),
		}
		for scan in scans {
			for raw_event in scan.events {
				completions.push(self.queue.add_event(
					address,
					scan.descriptor.meta_parser.clone(),
					raw_event,
				));
			}
			if let Err(e) = scan.outcome {
				failure.get_or_insert(e);
			}
		}

		settle_backfill(completions).await?;
		match failure {
			Some(e) => Err(e.into()),
			None => Ok(head.number),
		}
	}

	/// Logs a submitted transaction and returns its receipt
	///
	/// The hash is enqueued as soon as it is known, and again from the
	/// receipt once mined. Resolves after the mined transaction was emitted.
	pub async fn log_transaction(
		&self,
		address: &str,
		submission: Submission,
	) -> Result<EvmReceipt, SyncError> {
		self.ensure_running()?;
		let LoggedTransaction { tx_hash, receipt } = submission.into();

		if let Some(tx_hash) = &tx_hash {
			debug!(tx_hash = %tx_hash, "transaction broadcast");
			let _ = self.queue.add_transaction(address, None, tx_hash);
		}

		let receipt = receipt.await?;
		let hash = hash_to_string(&receipt.transaction_hash);
		debug!(tx_hash = %hash, "transaction mined");
		self.queue.add_transaction(address, None, &hash).await?;
		Ok(receipt)
	}

	/// Publishes the balance of an address now and after every coin activity
	pub fn watch_balance(&self, address: &str) {
		let mut activity = self.bus.subscribe_coin_tx();
		let adapter = self.adapter.clone();
		let bus = self.bus.clone();
		let address = address.to_string();
		let symbol = self.options.symbol.clone();

		self.spawn(async move {
			refresh_balance(adapter.as_ref(), &bus, &address, &symbol).await;
			loop {
				match activity.recv().await {
					Ok(event) if event.address.eq_ignore_ascii_case(&address) => {
						refresh_balance(adapter.as_ref(), &bus, &address, &symbol).await
					}
					Ok(_) => {}
					Err(RecvError::Lagged(_)) => {
						refresh_balance(adapter.as_ref(), &bus, &address, &symbol).await
					}
					Err(RecvError::Closed) => break,
				}
			}
		});
	}

	/// Stops the engine
	///
	/// Subscriptions and the realtime feed are closed, pending scans are
	/// cancelled and the queue drains what it already holds.
	pub async fn stop(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}

		let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
		for task in &tasks {
			task.abort();
		}
		self.scanner.cancel();
		self.queue.shutdown().await;
		self.tracker.stop();
		info!(tasks = tasks.len(), "sync engine stopped");
	}

	fn watchable_descriptors(&self, address: &str) -> Vec<EventDescriptor> {
		self.registry
			.descriptors_for(address)
			.into_iter()
			.filter(|descriptor| {
				let declared = descriptor.event_schema().is_some();
				if !declared {
					debug!(
						contract = %descriptor.contract_address,
						event = %descriptor.event_name,
						"event not declared by contract ABI, not watched"
					);
				}
				declared
			})
			.collect()
	}

	fn enqueue_hashes(&self, address: &str, hashes: &[String]) -> Vec<Completion> {
		hashes
			.iter()
			.map(|hash| self.queue.add_transaction(address, None, hash))
			.collect()
	}

	fn feed_failure_message(&self) -> String {
		format!("Failed to sync {} transactions", self.options.display_name)
	}
}

/// Waits until every backfilled notification was emitted, rejected or deferred
///
/// Transactions not retrievable yet are left to a later notification.
async fn settle_backfill(completions: Vec<Completion>) -> Result<(), SyncError> {
	let settled = join_all(completions.into_iter().map(Completion::settled_or_deferred)).await;
	let deferred = settled.iter().filter(|result| result.is_none()).count();
	if deferred > 0 {
		debug!(deferred, "backfilled transactions not retrievable yet");
	}
	settled.into_iter().flatten().try_for_each(|result| result.map_err(SyncError::from))
}

fn events_failure_message(descriptor: &EventDescriptor) -> String {
	format!("Failed to sync {} events", descriptor.event_name)
}

/// Relays the realtime feed into the queue, flagging the cursor on failures
async fn follow_feed(
	mut feed: FeedStream,
	queue: ConsolidationQueue,
	bus: EventBus,
	cursor: Arc<SyncCursor>,
	address: String,
	failure_message: String,
) {
	while let Some(event) = feed.next().await {
		match event {
			FeedEvent::Tx(hash) => {
				let _ = queue.add_transaction(&address, None, &hash);
			}
			FeedEvent::Error(e) => {
				if e.interrupts_feed() {
					cursor.request_resync();
				}
				bus.publish_wallet_error(INDEXER_PLUGIN, &failure_message, e);
			}
			FeedEvent::Resync => {
				info!(address = %address, "indexer reconnected, resync scheduled");
				cursor.request_resync();
			}
		}
	}
	debug!(address = %address, "transaction feed ended");
}

/// Relays a contract event subscription into the queue
async fn follow_events(
	mut events: EventStream,
	descriptor: EventDescriptor,
	cursor: Arc<SyncCursor>,
	queue: ConsolidationQueue,
	bus: EventBus,
	address: String,
) {
	while let Some(item) = events.next().await {
		match item {
			Ok(raw_event) => {
				let _ = queue.add_event(&address, descriptor.meta_parser.clone(), raw_event);
			}
			Err(e) => {
				cursor.request_resync();
				bus.publish_wallet_error(EVENTS_PLUGIN, &events_failure_message(&descriptor), e);
			}
		}
	}
	debug!(address = %address, event = %descriptor.event_name, "event subscription ended");
}

/// Feeds block ticks to a cursor, scanning with `scan` when a resync is due
async fn drive_cursor<F, Fut>(
	mut ticks: broadcast::Receiver<BlockHeader>,
	cursor: Arc<SyncCursor>,
	bus: EventBus,
	plugin: &'static str,
	failure_message: String,
	scan: F,
) where
	F: Fn(u64, u64) -> Fut,
	Fut: Future<Output = Result<(), ScannerError>>,
{
	loop {
		match ticks.recv().await {
			Ok(header) => {
				if let TickOutcome::Failed { error, .. } = cursor.on_block(header.number, &scan).await
				{
					bus.publish_wallet_error(plugin, &failure_message, error);
				}
			}
			Err(RecvError::Lagged(skipped)) => {
				warn!(cursor = %cursor.name(), skipped, "block ticks lagged");
			}
			Err(RecvError::Closed) => break,
		}
	}
}

async fn refresh_balance(adapter: &dyn CoinAdapter, bus: &EventBus, address: &str, symbol: &str) {
	match adapter.get_balance(address).await {
		Ok(balance) => {
			if let Err(e) = bus.publish_wallet_state(address, AddressUpdate::Balance(balance)) {
				warn!(address = %address, "balance not published: {}", e);
			}
		}
		Err(e) => bus.publish_wallet_error(
			BALANCE_PLUGIN,
			&format!("Could not get {} balance", symbol),
			e,
		),
	}
}
