//! Indexer error types.

use log::error;
use std::{error::Error, fmt};

/// Errors raised while talking to the transaction indexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerError {
	/// The session (cookie) bootstrap failed
	SessionError(String),

	/// A REST request failed
	RequestError(String),

	/// The indexer sent a payload that does not follow the protocol
	DataError(String),

	/// The realtime socket failed or was closed
	ConnectionError(String),
}

impl IndexerError {
	fn format_message(&self) -> String {
		match self {
			Self::SessionError(msg) => format!("Session error: {}", msg),
			Self::RequestError(msg) => format!("Request error: {}", msg),
			Self::DataError(msg) => format!("Data error: {}", msg),
			Self::ConnectionError(msg) => format!("Connection error: {}", msg),
		}
	}

	pub fn session_error(msg: impl Into<String>) -> Self {
		let error = Self::SessionError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn request_error(msg: impl Into<String>) -> Self {
		let error = Self::RequestError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn data_error(msg: impl Into<String>) -> Self {
		let error = Self::DataError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn connection_error(msg: impl Into<String>) -> Self {
		let error = Self::ConnectionError(msg.into());
		error!("{}", error.format_message());
		error
	}

	/// Whether notifications may have been lost because of this error
	///
	/// Malformed payloads are dropped on their own, the connection stays intact.
	pub fn interrupts_feed(&self) -> bool {
		!matches!(self, Self::DataError(_))
	}

	/// Message without the category prefix
	pub fn message(&self) -> &str {
		match self {
			Self::SessionError(msg)
			| Self::RequestError(msg)
			| Self::DataError(msg)
			| Self::ConnectionError(msg) => msg,
		}
	}
}

impl fmt::Display for IndexerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.format_message())
	}
}

impl Error for IndexerError {}

impl From<reqwest_middleware::Error> for IndexerError {
	fn from(err: reqwest_middleware::Error) -> Self {
		Self::request_error(err.to_string())
	}
}

impl From<reqwest::Error> for IndexerError {
	fn from(err: reqwest::Error) -> Self {
		Self::request_error(err.to_string())
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for IndexerError {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		Self::connection_error(err.to_string())
	}
}
