//! Consolidation queue.
//!
//! Collects transaction and contract-event notifications, debounces them per
//! address and emits one consolidated `wallet-state-changed` update per
//! flush. Annotations are merged per transaction hash and cached across
//! flushes so late events are never lost.
//!
//! Stopping the queue drains it: every worker flushes what it already holds
//! before exiting, and later enqueues are rejected with
//! [`QueueError::Stopped`].

mod error;
mod merge;
mod notification;
mod worker;

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

pub use error::QueueError;
pub use merge::{deep_merge, MetaCache};
pub use notification::{Completion, NotificationKind, PendingNotification};
pub use worker::{QueueConfig, QUEUE_PLUGIN};

use crate::{
	models::{Meta, MetaParser, RawEvent},
	services::{blockchain::CoinAdapter, bus::EventBus},
	utils::metrics::NOTIFICATIONS_ENQUEUED,
};
use worker::{run_worker, FlushContext};

struct WorkerHandle {
	inbox: mpsc::UnboundedSender<PendingNotification>,
	task: JoinHandle<()>,
}

/// Debounced, per-address consolidation of notifications
#[derive(Clone)]
pub struct ConsolidationQueue {
	context: Arc<FlushContext>,
	workers: Arc<Mutex<HashMap<String, WorkerHandle>>>,
	stopped: Arc<AtomicBool>,
}

impl ConsolidationQueue {
	pub fn new(adapter: Arc<dyn CoinAdapter>, bus: EventBus, config: QueueConfig) -> Self {
		Self {
			context: Arc::new(FlushContext {
				adapter,
				bus,
				meta_cache: MetaCache::new(),
				config,
			}),
			workers: Arc::new(Mutex::new(HashMap::new())),
			stopped: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Annotations accumulated so far, per transaction hash
	pub fn meta_cache(&self) -> &MetaCache {
		&self.context.meta_cache
	}

	/// Enqueues a bare transaction hash
	pub fn add_transaction(&self, address: &str, meta: Option<Meta>, hash: &str) -> Completion {
		self.enqueue(
			address,
			NotificationKind::Tx {
				hash: hash.to_string(),
				meta,
			},
		)
	}

	/// Enqueues a decoded contract event
	pub fn add_event(
		&self,
		address: &str,
		meta_parser: MetaParser,
		raw_event: RawEvent,
	) -> Completion {
		self.enqueue(
			address,
			NotificationKind::Event {
				raw_event,
				meta_parser,
			},
		)
	}

	fn enqueue(&self, address: &str, kind: NotificationKind) -> Completion {
		// checked under the lock so shutdown never misses a worker
		let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
		if self.stopped.load(Ordering::SeqCst) {
			return Completion::settled(Err(QueueError::stopped(format!(
				"notification for {} refused",
				kind.hash()
			))));
		}

		NOTIFICATIONS_ENQUEUED
			.with_label_values(&[kind.label()])
			.inc();
		debug!(address = %address, tx_hash = %kind.hash(), kind = kind.label(), "notification enqueued");

		let (notification, completion) = PendingNotification::new(address.to_string(), kind);
		let key = address.to_lowercase();

		let notification = match workers.get(&key) {
			Some(worker) => match worker.inbox.send(notification) {
				Ok(()) => return completion,
				// the worker exited, start a new one below
				Err(mpsc::error::SendError(notification)) => notification,
			},
			None => notification,
		};

		let (inbox, receiver) = mpsc::unbounded_channel();
		let task = tokio::spawn(run_worker(
			self.context.clone(),
			address.to_string(),
			receiver,
		));
		let _ = inbox.send(notification);
		workers.insert(key, WorkerHandle { inbox, task });
		completion
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	/// Stops accepting notifications and waits for every worker to drain
	pub async fn shutdown(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}

		let workers: Vec<WorkerHandle> = {
			let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
			workers.drain().map(|(_, worker)| worker).collect()
		};
		info!(workers = workers.len(), "draining consolidation queue");

		for WorkerHandle { inbox, task } in workers {
			drop(inbox);
			let _ = task.await;
		}
		info!("consolidation queue stopped");
	}
}
