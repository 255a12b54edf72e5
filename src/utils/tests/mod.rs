//! Test helper utilities
//!
//! This module contains test helper utilities for the application.
//!
//! - `builders`: Test helper utilities for creating test instances of models

pub mod builders {
	pub mod event;
	pub mod transaction;
}

pub use builders::{event::*, transaction::*};
