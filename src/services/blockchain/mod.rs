//! Coin adapter interfaces and implementations.
//!
//! Provides the chain facing capability set the synchronization engine
//! consumes. Includes:
//!
//! - The [`CoinAdapter`] trait
//! - ABI log decoding helpers
//! - A JSON-RPC HTTP transport
//! - An EVM adapter built on that transport
//! - Error handling for blockchain operations

mod abi;
mod adapter;
mod error;
mod evm;
mod transport;

pub use abi::{decode_log_values, dyn_sol_to_json, hash_to_string};
pub use adapter::{CoinAdapter, EventQuery, EventStream, HeadStream};
pub use error::BlockChainError;
pub use evm::EvmCoinAdapter;
pub use transport::{HttpTransportClient, JsonRpcTransport};
