//! Reader substrate: threshold-spilling byte readers with MIME sniffing.
//!
//! # Scope
//! Presents an arbitrarily large input as a uniform, seekable-when-needed
//! byte reader while keeping memory bounded:
//! - below a configurable threshold, content is buffered in memory;
//! - above it, content spills to a process-prefixed temporary file that is
//!   unlinked on drop;
//! - the first ≤512 bytes can be peeked for MIME/container sniffing without
//!   disturbing the read cursor.
//!
//! Stale spill files from prior crashed runs are swept at engine startup and
//! on cancellation (see [`sweep_stale_spool_files`]).

pub mod sniff;
pub mod spool;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sniff::{sniff_binary, BinaryKind, SkipList};
pub use spool::{sweep_stale_spool_files, SpoolingReader};

/// Default in-memory buffering threshold (10 MiB).
pub const DEFAULT_SPILL_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Default peek/sniff window.
pub const DEFAULT_PEEK_LEN: usize = 512;

/// Reader substrate configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Bytes buffered in memory before spilling to a temporary file.
    pub spill_threshold: u64,
    /// Sniff window size; bounded peek-ahead never exceeds this.
    pub peek_len: usize,
    /// Binary kinds discarded early and counted as files skipped.
    pub skip: SkipList,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            peek_len: DEFAULT_PEEK_LEN,
            skip: SkipList::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReaderConfigError {
    #[error("spill threshold must be > 0")]
    ZeroSpillThreshold,
    #[error("peek length must be > 0")]
    ZeroPeekLen,
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<(), ReaderConfigError> {
        if self.spill_threshold == 0 {
            return Err(ReaderConfigError::ZeroSpillThreshold);
        }
        if self.peek_len == 0 {
            return Err(ReaderConfigError::ZeroPeekLen);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ReaderConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_threshold_rejected() {
        let cfg = ReaderConfig {
            spill_threshold: 0,
            ..ReaderConfig::default()
        };
        assert_eq!(
            cfg.validate().unwrap_err(),
            ReaderConfigError::ZeroSpillThreshold
        );
    }
}
