//! Logging utilities for the application
//!
//! `setup_logging` installs a `tracing_subscriber` registry filtered by
//! `RUST_LOG` (default `info`). Output goes to stdout, or to a daily rolling
//! file when `LOG_MODE=file`, in which case `LOG_DATA_DIR` selects the
//! directory (default `logs/`).
//!
//! `setup_logging_with_writer` takes any writer, tests use it to capture output.
use std::path::PathBuf;

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

const LOG_FILE_PREFIX: &str = "wallet-tx-sync.log";

/// Where log output is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
	Stdout,
	File(PathBuf),
}

impl LogTarget {
	/// Resolves the target from `LOG_MODE` and `LOG_DATA_DIR` style values
	pub fn resolve(mode: Option<&str>, data_dir: Option<&str>) -> Self {
		match mode {
			Some(mode) if mode.eq_ignore_ascii_case("file") => {
				Self::File(PathBuf::from(data_dir.unwrap_or("logs/")))
			}
			_ => Self::Stdout,
		}
	}

	fn from_env() -> Self {
		let mode = std::env::var("LOG_MODE").ok();
		let data_dir = std::env::var("LOG_DATA_DIR").ok();
		Self::resolve(mode.as_deref(), data_dir.as_deref())
	}
}

/// Setup logging for the application
///
/// Writes to stdout unless `LOG_MODE=file` is set.
pub fn setup_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
	match LogTarget::from_env() {
		LogTarget::Stdout => setup_logging_with_writer(std::io::stdout),
		LogTarget::File(dir) => {
			std::fs::create_dir_all(&dir)?;
			let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
			setup_logging_with_writer(appender)
		}
	}
}

/// Setup logging for the application with a custom writer
pub fn setup_logging_with_writer<W>(
	writer: W,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>
where
	W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::registry()
		.with(filter)
		.with(
			fmt::layer()
				.with_writer(writer)
				.event_format(
					fmt::format()
						.with_level(true)
						.with_target(true)
						.with_thread_ids(false)
						.with_thread_names(false)
						.with_ansi(true)
						.compact(),
				)
				.fmt_fields(fmt::format::PrettyFields::new()),
		)
		.try_init()?;
	Ok(())
}
