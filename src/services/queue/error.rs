//! Consolidation queue error types.

use log::error;
use std::{error::Error, fmt};

use crate::services::bus::BusError;

/// Reasons a caller completion is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
	/// The flush could not emit because no wallet is open
	NoWalletContext(String),

	/// Fetching a transaction or receipt failed with a non-404 error
	FetchError(String),

	/// The queue was stopped before the notification could be flushed
	Stopped(String),

	/// The worker holding the notification went away without answering
	Abandoned(String),
}

impl QueueError {
	fn format_message(&self) -> String {
		match self {
			Self::NoWalletContext(msg) => format!("No wallet context: {}", msg),
			Self::FetchError(msg) => format!("Fetch error: {}", msg),
			Self::Stopped(msg) => format!("Queue stopped: {}", msg),
			Self::Abandoned(msg) => format!("Notification abandoned: {}", msg),
		}
	}

	pub fn no_wallet_context(msg: impl Into<String>) -> Self {
		let error = Self::NoWalletContext(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn fetch_error(msg: impl Into<String>) -> Self {
		let error = Self::FetchError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn stopped(msg: impl Into<String>) -> Self {
		let error = Self::Stopped(msg.into());
		log::info!("{}", error.format_message());
		error
	}

	pub fn abandoned(msg: impl Into<String>) -> Self {
		let error = Self::Abandoned(msg.into());
		error!("{}", error.format_message());
		error
	}
}

impl fmt::Display for QueueError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.format_message())
	}
}

impl Error for QueueError {}

impl From<BusError> for QueueError {
	fn from(err: BusError) -> Self {
		match err {
			BusError::NoWalletContext => Self::no_wallet_context(err.to_string()),
		}
	}
}
