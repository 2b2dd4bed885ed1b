//! Archive and compression handling.
//!
//! # Scope
//! Container recognition (magic sniff on the first ≤512 bytes, filename
//! fallback), bounded recursive expansion into child chunks, and the
//! configuration/budget types shared by both.
//!
//! # Design Notes
//! - Expansion is streaming and bounded: recursion depth, a wall-clock
//!   budget per root container, and a per-file size budget. Exceeding any
//!   bound yields a partial result plus warnings, never an error that stops
//!   the scan.
//! - Archive payloads are hostile input: sizes, counts, and paths are
//!   untrusted.

pub mod budget;
pub mod detect;
pub mod expand;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use budget::{ArchiveBudget, BudgetHit};
pub use detect::{detect_kind_from_name_bytes, sniff_archive, ArchiveKind, UnsupportedKind};
pub use expand::{expand_archive, ArchiveEntry, ExpandReport, ProcessingWarning};

/// Archive expansion limits.
///
/// All limits are hard bounds; see module docs for how each maps to a
/// partial outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Master enable switch; when off, containers are scanned as opaque
    /// bytes like any other file.
    pub enabled: bool,
    /// Maximum nesting depth.
    pub max_depth: u8,
    /// Maximum decompressed bytes emitted per contained file.
    pub max_entry_bytes: u64,
    /// Wall-clock budget for expanding one root container, in seconds.
    pub timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 5,
            max_entry_bytes: 250 * 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArchiveConfigError {
    #[error("max_depth must be > 0")]
    MaxDepthZero,
    #[error("max_entry_bytes must be > 0")]
    MaxEntryBytesZero,
    #[error("timeout_secs must be > 0")]
    TimeoutZero,
}

impl ArchiveConfig {
    /// Validate invariants; cheap, call once at startup. Validation runs
    /// even when disabled so configs can be checked in tests.
    pub fn validate(&self) -> Result<(), ArchiveConfigError> {
        if self.max_depth == 0 {
            return Err(ArchiveConfigError::MaxDepthZero);
        }
        if self.max_entry_bytes == 0 {
            return Err(ArchiveConfigError::MaxEntryBytesZero);
        }
        if self.timeout_secs == 0 {
            return Err(ArchiveConfigError::TimeoutZero);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ArchiveConfig::default();
        assert!(cfg.enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_depth_rejected() {
        let cfg = ArchiveConfig {
            max_depth: 0,
            ..ArchiveConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err(), ArchiveConfigError::MaxDepthZero);
    }
}
