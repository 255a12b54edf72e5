//! Chain-head tracker error types.

use log::error;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockWatcherError {
	/// The head could not be fetched from the chain
	NetworkError(String),
	/// The tracker stopped before producing a head
	StoppedError(String),
}

impl BlockWatcherError {
	fn format_message(&self) -> String {
		match self {
			Self::NetworkError(msg) => format!("Network error: {}", msg),
			Self::StoppedError(msg) => format!("Tracker stopped: {}", msg),
		}
	}

	pub fn network_error(msg: impl Into<String>) -> Self {
		let error = Self::NetworkError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn stopped_error(msg: impl Into<String>) -> Self {
		let error = Self::StoppedError(msg.into());
		error!("{}", error.format_message());
		error
	}
}

impl fmt::Display for BlockWatcherError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.format_message())
	}
}

impl Error for BlockWatcherError {}

impl From<crate::services::blockchain::BlockChainError> for BlockWatcherError {
	fn from(err: crate::services::blockchain::BlockChainError) -> Self {
		Self::network_error(err.to_string())
	}
}
