//! Synchronization engine entry point.
//!
//! - `SyncOrchestrator`: public synchronization operations
//! - `Submission` / `LoggedTransaction`: normalized transaction submissions
//! - `try_parse_event_log`: receipt log matching used by refreshes
//! - `SyncError`: error type of the public operations

mod error;
mod events;
mod orchestrator;
mod submission;

pub use error::SyncError;
pub use events::try_parse_event_log;
pub use orchestrator::{
	SyncComponents, SyncOptions, SyncOrchestrator, BALANCE_PLUGIN, EVENTS_PLUGIN,
};
pub use submission::{LoggedTransaction, ReceiptFuture, Submission};
