//! Per-address flush worker.
//!
//! Each address owns one worker task fed by an inbox channel. The worker waits
//! for a first notification, keeps collecting until the inbox has been quiet
//! for the debounce period, then flushes the batch. Flushes of one address are
//! therefore strictly sequential; notifications arriving during a flush form
//! the next batch.

use std::{collections::HashMap, sync::Arc, time::Duration};

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::future::join_all;
use tokio::{
	sync::mpsc,
	time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
	models::{AddressUpdate, EvmReceipt, EvmTransaction, Meta, SyncConfig, TransactionRecord},
	services::{
		blockchain::{BlockChainError, CoinAdapter},
		bus::EventBus,
		queue::{
			notification::CompletionSink, MetaCache, PendingNotification, QueueError,
		},
	},
	utils::metrics::{COMPLETIONS_REJECTED, QUEUE_EMISSIONS, QUEUE_FLUSHES},
};

/// Name reported in `wallet-error` events raised by a failed flush
pub const QUEUE_PLUGIN: &str = "explorer";

/// Timings of the consolidation queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
	/// Quiet period closing a batch
	pub debounce: Duration,
	/// Attempts made while the explorer answers 404
	pub not_found_retries: usize,
	/// First delay between 404 attempts
	pub not_found_backoff: Duration,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			debounce: Duration::from_millis(300),
			not_found_retries: 5,
			not_found_backoff: Duration::from_millis(250),
		}
	}
}

impl QueueConfig {
	pub fn from_sync_config(config: &SyncConfig) -> Self {
		Self {
			debounce: config.debounce(),
			not_found_retries: config.not_found_retries,
			not_found_backoff: config.not_found_backoff(),
		}
	}

	fn not_found_policy(&self) -> ExponentialBuilder {
		ExponentialBuilder::default()
			.with_min_delay(self.not_found_backoff)
			.with_max_times(self.not_found_retries)
	}
}

/// Shared state every worker flushes with
pub(crate) struct FlushContext {
	pub adapter: Arc<dyn CoinAdapter>,
	pub bus: EventBus,
	pub meta_cache: MetaCache,
	pub config: QueueConfig,
}

/// Notifications of one transaction within a batch
struct HashGroup {
	hash: String,
	metas: Vec<Meta>,
	sinks: Vec<CompletionSink>,
}

pub(crate) async fn run_worker(
	context: Arc<FlushContext>,
	address: String,
	mut inbox: mpsc::UnboundedReceiver<PendingNotification>,
) {
	// sinks of hashes whose body was not retrievable yet, keyed by lowercase hash
	let mut deferred: HashMap<String, Vec<CompletionSink>> = HashMap::new();

	while let Some(first) = inbox.recv().await {
		let mut batch = vec![first];
		let mut open = true;
		loop {
			match timeout(context.config.debounce, inbox.recv()).await {
				Ok(Some(notification)) => batch.push(notification),
				Ok(None) => {
					open = false;
					break;
				}
				Err(_) => break,
			}
		}

		flush(&context, &address, batch, &mut deferred).await;

		if !open {
			break;
		}
	}

	let pending = deferred.values().map(Vec::len).sum::<usize>();
	if pending > 0 {
		info!(address = %address, pending, "queue stopped with unconfirmed transactions");
		reject(
			deferred.into_values().flatten(),
			QueueError::stopped(format!("{} unconfirmed notifications dropped", pending)),
		);
	}
	debug!(address = %address, "queue worker exited");
}

async fn flush(
	context: &FlushContext,
	address: &str,
	batch: Vec<PendingNotification>,
	deferred: &mut HashMap<String, Vec<CompletionSink>>,
) {
	QUEUE_FLUSHES.inc();
	debug!(address = %address, notifications = batch.len(), "flushing");

	let mut order = Vec::new();
	let mut groups: HashMap<String, HashGroup> = HashMap::new();
	for notification in batch {
		let key = notification.kind.hash().to_lowercase();
		let meta = notification.kind.meta();
		let group = groups.entry(key.clone()).or_insert_with(|| {
			order.push(key);
			HashGroup {
				hash: notification.kind.hash().to_string(),
				metas: Vec::new(),
				sinks: Vec::new(),
			}
		});
		group.metas.push(meta);
		group.sinks.push(notification.sink);
	}

	let mut merged = HashMap::new();
	for key in &order {
		let group = &groups[key];
		merged.insert(key.clone(), context.meta_cache.merge(key, &group.metas));
	}

	let fetched = join_all(
		order
			.iter()
			.map(|key| fetch_transaction(context, &groups[key].hash)),
	)
	.await
	.into_iter()
	.collect::<Result<Vec<_>, _>>();

	let fetched = match fetched {
		Ok(fetched) => fetched,
		Err(error) => {
			context.bus.publish_wallet_error(
				QUEUE_PLUGIN,
				"Could not emit event transaction",
				&error,
			);
			let error = QueueError::fetch_error(error.to_string());
			let waiting: Vec<_> = order
				.iter()
				.filter_map(|key| deferred.remove(key))
				.flatten()
				.collect();
			let batch_sinks = groups.into_values().flat_map(|group| group.sinks);
			reject(batch_sinks.chain(waiting), error);
			return;
		}
	};

	let mut records = Vec::new();
	let mut sinks = Vec::new();
	for (key, (transaction, receipt)) in order.iter().zip(fetched) {
		let Some(group) = groups.remove(key) else {
			continue;
		};
		match transaction {
			Some(transaction) => {
				let meta = merged.remove(key).unwrap_or_default();
				records.push(TransactionRecord::new(transaction, receipt, meta));
				sinks.extend(group.sinks);
				sinks.extend(deferred.remove(key).unwrap_or_default());
			}
			None => {
				debug!(address = %address, tx_hash = %group.hash, "transaction not retrievable yet, deferring");
				let waiting = deferred.entry(key.clone()).or_default();
				for mut sink in group.sinks {
					sink.defer();
					waiting.push(sink);
				}
			}
		}
	}

	if records.is_empty() {
		return;
	}

	let count = records.len();
	match context
		.bus
		.publish_wallet_state(address, AddressUpdate::Transactions(records))
	{
		Ok(()) => {
			QUEUE_EMISSIONS.inc();
			context.bus.publish_coin_tx(address);
			info!(address = %address, transactions = count, "wallet state emitted");
			for sink in sinks {
				sink.send(Ok(()));
			}
		}
		Err(e) => {
			context
				.bus
				.publish_wallet_error(QUEUE_PLUGIN, "Could not emit event transaction", &e);
			reject(sinks, QueueError::from(e));
		}
	}
}

type FetchedTransaction = (Option<EvmTransaction>, Option<EvmReceipt>);

/// Fetches a transaction body and its receipt concurrently
///
/// 404 answers are retried with backoff. A 404 outlasting the retries counts
/// as not retrievable yet.
async fn fetch_transaction(
	context: &FlushContext,
	hash: &str,
) -> Result<FetchedTransaction, BlockChainError> {
	let (transaction, receipt) = tokio::join!(
		fetch_body(context, hash),
		fetch_receipt(context, hash)
	);
	Ok((transaction?, receipt?))
}

async fn fetch_body(
	context: &FlushContext,
	hash: &str,
) -> Result<Option<EvmTransaction>, BlockChainError> {
	let mut delays = context.config.not_found_policy().build();
	loop {
		match context.adapter.get_transaction(hash).await {
			Err(e) if e.is_not_found() => {
				if !wait_after_not_found(&mut delays, hash, "transaction").await {
					return Ok(None);
				}
			}
			other => return other,
		}
	}
}

async fn fetch_receipt(
	context: &FlushContext,
	hash: &str,
) -> Result<Option<EvmReceipt>, BlockChainError> {
	let mut delays = context.config.not_found_policy().build();
	loop {
		match context.adapter.get_transaction_receipt(hash).await {
			Err(e) if e.is_not_found() => {
				if !wait_after_not_found(&mut delays, hash, "receipt").await {
					return Ok(None);
				}
			}
			other => return other,
		}
	}
}

/// Sleeps for the next backoff delay, false once the retries are exhausted
async fn wait_after_not_found(
	delays: &mut impl Iterator<Item = Duration>,
	hash: &str,
	what: &str,
) -> bool {
	match delays.next() {
		Some(delay) => {
			debug!(tx_hash = %hash, delay = ?delay, "{} not found, retrying", what);
			sleep(delay).await;
			true
		}
		None => false,
	}
}

fn reject(sinks: impl IntoIterator<Item = CompletionSink>, error: QueueError) {
	let mut rejected = 0;
	for sink in sinks {
		rejected += 1;
		sink.send(Err(error.clone()));
	}
	if rejected > 0 {
		warn!(rejected, "completions rejected: {}", error);
		COMPLETIONS_REJECTED.inc_by(rejected);
	}
}
