//! Size Gate Module
//!
//! Post-transcode compression guard: a transcoded output that saves no space
//! is replaced by a copy of its source.

use serde::{Deserialize, Serialize};

/// Result of the compression check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompressionResult {
    /// Output is strictly smaller than the source
    Smaller { ratio: f64 },
    /// Output is at least as large as the source; keep the source instead
    NotSmaller { ratio: f64 },
}

/// Compression ratio `source / output`; infinite for an empty output.
pub fn compression_ratio(source_bytes: u64, output_bytes: u64) -> f64 {
    if output_bytes == 0 {
        f64::INFINITY
    } else {
        source_bytes as f64 / output_bytes as f64
    }
}

/// Check whether a transcoded output saved any space.
///
/// Returns `NotSmaller` if `output_bytes >= source_bytes`.
pub fn check_compression(source_bytes: u64, output_bytes: u64) -> CompressionResult {
    let ratio = compression_ratio(source_bytes, output_bytes);
    if output_bytes >= source_bytes {
        CompressionResult::NotSmaller { ratio }
    } else {
        CompressionResult::Smaller { ratio }
    }
}
