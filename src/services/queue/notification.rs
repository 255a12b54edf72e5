//! Notifications waiting in the consolidation queue.

use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{
	models::{Meta, MetaParser, RawEvent},
	services::queue::QueueError,
};

/// Answering side of a [`Completion`]
pub(crate) struct CompletionSink {
	result: oneshot::Sender<Result<(), QueueError>>,
	deferred: Option<oneshot::Sender<()>>,
}

impl CompletionSink {
	pub(crate) fn send(self, result: Result<(), QueueError>) {
		let _ = self.result.send(result);
	}

	/// Tells the caller the transaction was not retrievable yet
	///
	/// The completion stays pending until a later flush settles it.
	pub(crate) fn defer(&mut self) {
		if let Some(deferred) = self.deferred.take() {
			let _ = deferred.send(());
		}
	}
}

/// What was observed for a transaction
#[derive(Clone)]
pub enum NotificationKind {
	/// A bare transaction hash with an optional caller annotation
	Tx { hash: String, meta: Option<Meta> },
	/// A decoded contract event and the parser producing its annotation
	Event {
		raw_event: RawEvent,
		meta_parser: MetaParser,
	},
}

impl NotificationKind {
	pub fn hash(&self) -> &str {
		match self {
			Self::Tx { hash, .. } => hash,
			Self::Event { raw_event, .. } => &raw_event.transaction_hash,
		}
	}

	/// Annotation this notification contributes to its transaction
	pub fn meta(&self) -> Meta {
		match self {
			Self::Tx { meta, .. } => meta.clone().unwrap_or_default(),
			Self::Event {
				raw_event,
				meta_parser,
			} => meta_parser(raw_event),
		}
	}

	/// Label used in metrics
	pub fn label(&self) -> &'static str {
		match self {
			Self::Tx { .. } => "tx",
			Self::Event { .. } => "event",
		}
	}
}

/// A notification and the sink answering its caller
pub struct PendingNotification {
	pub address: String,
	pub kind: NotificationKind,
	pub(crate) sink: CompletionSink,
}

impl PendingNotification {
	pub(crate) fn new(address: String, kind: NotificationKind) -> (Self, Completion) {
		let (sink, completion) = Completion::channel();
		(
			Self {
				address,
				kind,
				sink,
			},
			completion,
		)
	}
}

/// Resolves once the notification has been emitted, or with the reason it never will be
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
	result: oneshot::Receiver<Result<(), QueueError>>,
	deferred: oneshot::Receiver<()>,
}

impl Completion {
	fn channel() -> (CompletionSink, Self) {
		let (result_sink, result) = oneshot::channel();
		let (deferred_sink, deferred) = oneshot::channel();
		(
			CompletionSink {
				result: result_sink,
				deferred: Some(deferred_sink),
			},
			Self { result, deferred },
		)
	}

	/// A completion that is already settled
	pub(crate) fn settled(result: Result<(), QueueError>) -> Self {
		let (sink, completion) = Self::channel();
		sink.send(result);
		completion
	}

	/// Waits until the notification is emitted, rejected or deferred
	///
	/// Returns `None` when the transaction body was not retrievable yet.
	pub async fn settled_or_deferred(self) -> Option<Result<(), QueueError>> {
		let Self {
			mut result,
			deferred,
		} = self;
		tokio::select! {
			biased;
			settled = &mut result => Some(settled.unwrap_or_else(|_| Err(abandoned()))),
			Ok(()) = deferred => None,
		}
	}
}

fn abandoned() -> QueueError {
	QueueError::abandoned("completion sink dropped")
}

impl Future for Completion {
	type Output = Result<(), QueueError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.result)
			.poll(cx)
			.map(|result| result.unwrap_or_else(|_| Err(abandoned())))
	}
}
