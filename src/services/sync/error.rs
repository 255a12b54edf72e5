//! Sync orchestrator error types.

use log::error;
use std::{error::Error, fmt};

use crate::services::{
	blockchain::BlockChainError, blockwatcher::BlockWatcherError, queue::QueueError,
	scanner::ScannerError,
};

/// Errors returned by the public synchronization operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
	/// No chain head could be obtained
	HeadError(String),

	/// The coin adapter failed
	AdapterError(String),

	/// A historical scan failed
	ScanError(String),

	/// A notification was rejected by the consolidation queue
	QueueError(String),

	/// The engine was stopped
	StoppedError(String),
}

impl SyncError {
	fn format_message(&self) -> String {
		match self {
			Self::HeadError(msg) => format!("Head error: {}", msg),
			Self::AdapterError(msg) => format!("Adapter error: {}", msg),
			Self::ScanError(msg) => format!("Scan error: {}", msg),
			Self::QueueError(msg) => format!("Queue error: {}", msg),
			Self::StoppedError(msg) => format!("Sync stopped: {}", msg),
		}
	}

	pub fn head_error(msg: impl Into<String>) -> Self {
		let error = Self::HeadError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn adapter_error(msg: impl Into<String>) -> Self {
		let error = Self::AdapterError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn scan_error(msg: impl Into<String>) -> Self {
		let error = Self::ScanError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn queue_error(msg: impl Into<String>) -> Self {
		let error = Self::QueueError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn stopped_error(msg: impl Into<String>) -> Self {
		let error = Self::StoppedError(msg.into());
		log::info!("{}", error.format_message());
		error
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.format_message())
	}
}

impl Error for SyncError {}

impl From<BlockWatcherError> for SyncError {
	fn from(err: BlockWatcherError) -> Self {
		Self::head_error(err.to_string())
	}
}

impl From<BlockChainError> for SyncError {
	fn from(err: BlockChainError) -> Self {
		Self::adapter_error(err.to_string())
	}
}

impl From<ScannerError> for SyncError {
	fn from(err: ScannerError) -> Self {
		match err {
			ScannerError::Cancelled(_) => Self::stopped_error(err.to_string()),
			_ => Self::scan_error(err.to_string()),
		}
	}
}

impl From<QueueError> for SyncError {
	fn from(err: QueueError) -> Self {
		match err {
			QueueError::Stopped(_) => Self::stopped_error(err.to_string()),
			_ => Self::queue_error(err.to_string()),
		}
	}
}
