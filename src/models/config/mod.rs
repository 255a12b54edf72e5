//! Configuration loading and validation.
//!
//! - `SyncConfig`: tuning knobs and endpoints of the synchronization engine
//! - `ConfigLoader`: common interface for JSON backed configuration

use std::path::Path;

mod error;
mod sync_config;

pub use error::ConfigError;
pub use sync_config::SyncConfig;

/// Common interface for loading configuration files
pub trait ConfigLoader: Sized {
	fn load_from_path(path: &Path) -> Result<Self, ConfigError>;

	fn validate(&self) -> Result<(), String>;

	fn is_json_file(path: &Path) -> bool {
		path.extension()
			.map(|ext| ext.to_string_lossy().to_lowercase() == "json")
			.unwrap_or(false)
	}
}
