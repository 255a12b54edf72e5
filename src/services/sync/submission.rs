//! Normalization of transaction submission results.
//!
//! Signing paths either hand back a broadcast handle, whose hash is known as
//! soon as the node accepts the transaction, or only a future resolving to the
//! receipt. Both are turned into a [`LoggedTransaction`] before reaching the
//! consolidation queue.

use futures::future::BoxFuture;

use crate::{models::EvmReceipt, services::blockchain::BlockChainError};

/// Resolves to the receipt of a submitted transaction once mined
pub type ReceiptFuture = BoxFuture<'static, Result<EvmReceipt, BlockChainError>>;

/// Result of submitting a transaction, as produced by a signer
pub enum Submission {
	/// Broadcast transaction, hash known immediately
	Broadcast {
		tx_hash: String,
		receipt: ReceiptFuture,
	},
	/// Only the receipt will be known
	ReceiptOnly(ReceiptFuture),
}

/// Submission in the single shape consumed by the queue
pub struct LoggedTransaction {
	pub tx_hash: Option<String>,
	pub receipt: ReceiptFuture,
}

impl From<Submission> for LoggedTransaction {
	fn from(submission: Submission) -> Self {
		match submission {
			Submission::Broadcast { tx_hash, receipt } => Self {
				tx_hash: Some(tx_hash),
				receipt,
			},
			Submission::ReceiptOnly(receipt) => Self {
				tx_hash: None,
				receipt,
			},
		}
	}
}
