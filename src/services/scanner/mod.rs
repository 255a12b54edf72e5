//! Chunked historical scanner.
//!
//! - `ChunkedScanner`: bounded, windowed range scans of past transactions and
//!   past contract events
//! - `ScannerError`: scan error type

mod chunked;
mod error;

pub use chunked::{split_windows, ChunkedScanner, DescriptorScan, ScanProgress, ScannerConfig};
pub use error::ScannerError;
