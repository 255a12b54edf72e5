//! Blockchain error types and handling.
//!
//! Errors raised by coin adapters and their transports. `NotFound` is kept
//! apart from other request failures because explorers answer 404 for
//! transactions they have not indexed yet, which callers retry.

use log::error;

/// Represents possible errors that can occur during blockchain operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockChainError {
	/// Errors related to network connectivity issues
	ConnectionError(String),

	/// Errors related to malformed requests or invalid responses
	RequestError(String),

	/// The remote answered 404 for the requested resource
	NotFound(String),

	/// Payloads that could not be decoded (ABI, addresses, hex values)
	DecodeError(String),

	/// Internal errors within the adapter
	InternalError(String),
}

impl BlockChainError {
	fn format_message(&self) -> String {
		match self {
			Self::ConnectionError(msg) => format!("Connection error: {}", msg),
			Self::RequestError(msg) => format!("Request error: {}", msg),
			Self::NotFound(msg) => format!("Not found: {}", msg),
			Self::DecodeError(msg) => format!("Decode error: {}", msg),
			Self::InternalError(msg) => format!("Internal error: {}", msg),
		}
	}

	/// Creates a new connection error with logging
	pub fn connection_error(msg: impl Into<String>) -> Self {
		let error = Self::ConnectionError(msg.into());
		error!("{}", error.format_message());
		error
	}

	/// Creates a new request error with logging
	pub fn request_error(msg: impl Into<String>) -> Self {
		let error = Self::RequestError(msg.into());
		error!("{}", error.format_message());
		error
	}

	/// Creates a new not found error
	///
	/// Not logged at error level, 404s are expected while a transaction propagates.
	pub fn not_found(msg: impl Into<String>) -> Self {
		let error = Self::NotFound(msg.into());
		log::debug!("{}", error.format_message());
		error
	}

	/// Creates a new decode error with logging
	pub fn decode_error(msg: impl Into<String>) -> Self {
		let error = Self::DecodeError(msg.into());
		error!("{}", error.format_message());
		error
	}

	/// Creates a new internal error with logging
	pub fn internal_error(msg: impl Into<String>) -> Self {
		let error = Self::InternalError(msg.into());
		error!("{}", error.format_message());
		error
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound(_))
	}
}

// Standard error trait implementations
impl std::fmt::Display for BlockChainError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.format_message())
	}
}

impl std::error::Error for BlockChainError {}

impl From<reqwest_middleware::Error> for BlockChainError {
	fn from(err: reqwest_middleware::Error) -> Self {
		Self::connection_error(err.to_string())
	}
}

impl From<serde_json::Error> for BlockChainError {
	fn from(err: serde_json::Error) -> Self {
		Self::decode_error(err.to_string())
	}
}
