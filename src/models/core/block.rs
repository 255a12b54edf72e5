use serde::{Deserialize, Serialize};

/// Snapshot of the chain head as observed by the head tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
	/// Block hash (0x-prefixed)
	pub hash: String,

	/// Block height
	pub number: u64,

	/// Unix timestamp in seconds
	pub timestamp: u64,
}
