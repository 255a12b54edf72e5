//! Historical scanner error types.

use log::error;
use std::{error::Error, fmt};

use crate::services::{blockchain::BlockChainError, indexer::IndexerError};

/// Errors raised by a historical scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerError {
	/// The coin adapter failed to return past events
	AdapterError(String),

	/// The indexer failed to return past transactions
	IndexerError(String),

	/// A window fetch exceeded its timeout
	Timeout(String),

	/// The scan was cancelled by an engine stop
	Cancelled(String),
}

impl ScannerError {
	fn format_message(&self) -> String {
		match self {
			Self::AdapterError(msg) => format!("Adapter error: {}", msg),
			Self::IndexerError(msg) => format!("Indexer error: {}", msg),
			Self::Timeout(msg) => format!("Scan timeout: {}", msg),
			Self::Cancelled(msg) => format!("Scan cancelled: {}", msg),
		}
	}

	pub fn adapter_error(msg: impl Into<String>) -> Self {
		let error = Self::AdapterError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn indexer_error(msg: impl Into<String>) -> Self {
		let error = Self::IndexerError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn timeout(msg: impl Into<String>) -> Self {
		let error = Self::Timeout(msg.into());
		error!("{}", error.format_message());
		error
	}

	/// Cancellation is requested by the host, logged at info level only
	pub fn cancelled(msg: impl Into<String>) -> Self {
		let error = Self::Cancelled(msg.into());
		log::info!("{}", error.format_message());
		error
	}
}

impl fmt::Display for ScannerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.format_message())
	}
}

impl Error for ScannerError {}

impl From<BlockChainError> for ScannerError {
	fn from(err: BlockChainError) -> Self {
		Self::adapter_error(err.to_string())
	}
}

impl From<IndexerError> for ScannerError {
	fn from(err: IndexerError) -> Self {
		Self::indexer_error(err.to_string())
	}
}
