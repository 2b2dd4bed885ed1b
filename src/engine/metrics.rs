//! Scan metrics: monotonic counters and per-detector timings.
//!
//! # Design
//! - Counters are shared atomics updated from every stage; increments are
//!   relaxed (no ordering coupling between counters, monotonicity is all we
//!   promise).
//! - Per-detector slots are index-aligned with the detector registry and
//!   allocated once at engine build, so the hot path is two atomic adds with
//!   no map lookup.
//! - `snapshot()` is the read-only accessor; it loads each counter once and
//!   returns a plain value struct.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::detect::DetectorKey;

#[derive(Debug, Default)]
pub struct Metrics {
    chunks_scanned: AtomicU64,
    bytes_scanned: AtomicU64,
    verified_secrets_found: AtomicU64,
    unverified_secrets_found: AtomicU64,
    unknown_secrets_found: AtomicU64,
    files_skipped: AtomicU64,
    files_processing_timeouts: AtomicU64,
    detectors: Vec<DetectorSlot>,
}

#[derive(Debug)]
struct DetectorSlot {
    key: DetectorKey,
    invocations: AtomicU64,
    total_time_ns: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub chunks_scanned: u64,
    pub bytes_scanned: u64,
    pub verified_secrets_found: u64,
    pub unverified_secrets_found: u64,
    pub unknown_secrets_found: u64,
    pub files_skipped: u64,
    pub files_processing_timeouts: u64,
    pub detectors: Vec<DetectorMetricsSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DetectorMetricsSnapshot {
    pub detector: DetectorKey,
    pub invocations: u64,
    pub total_time_ns: u64,
}

impl Metrics {
    /// Allocates one timing slot per registered detector, index-aligned with
    /// the registry.
    pub fn new(detector_keys: Vec<DetectorKey>) -> Self {
        let detectors = detector_keys
            .into_iter()
            .map(|key| DetectorSlot {
                key,
                invocations: AtomicU64::new(0),
                total_time_ns: AtomicU64::new(0),
            })
            .collect();
        Self {
            detectors,
            ..Self::default()
        }
    }

    pub fn add_chunk(&self, bytes: u64) {
        self.chunks_scanned.fetch_add(1, Ordering::Relaxed);
        self.bytes_scanned.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_verified(&self) {
        self.verified_secrets_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unverified(&self) {
        self.unverified_secrets_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unknown(&self) {
        self.unknown_secrets_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_processing_timeout(&self) {
        self.files_processing_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one detector invocation with its wall time.
    pub fn add_detector_invocation(&self, detector_idx: usize, elapsed: Duration) {
        if let Some(slot) = self.detectors.get(detector_idx) {
            slot.invocations.fetch_add(1, Ordering::Relaxed);
            slot.total_time_ns
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_scanned: self.chunks_scanned.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            verified_secrets_found: self.verified_secrets_found.load(Ordering::Relaxed),
            unverified_secrets_found: self.unverified_secrets_found.load(Ordering::Relaxed),
            unknown_secrets_found: self.unknown_secrets_found.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_processing_timeouts: self.files_processing_timeouts.load(Ordering::Relaxed),
            detectors: self
                .detectors
                .iter()
                .filter(|s| s.invocations.load(Ordering::Relaxed) > 0)
                .map(|s| DetectorMetricsSnapshot {
                    detector: s.key.clone(),
                    invocations: s.invocations.load(Ordering::Relaxed),
                    total_time_ns: s.total_time_ns.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorType;

    fn key(version: u32) -> DetectorKey {
        DetectorKey {
            detector_type: DetectorType::Aws,
            version,
        }
    }

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new(vec![key(1), key(2)]);
        m.add_chunk(100);
        m.add_chunk(50);
        m.add_verified();
        m.add_unknown();
        m.add_file_skipped();
        let s = m.snapshot();
        assert_eq!(s.chunks_scanned, 2);
        assert_eq!(s.bytes_scanned, 150);
        assert_eq!(s.verified_secrets_found, 1);
        assert_eq!(s.unverified_secrets_found, 0);
        assert_eq!(s.unknown_secrets_found, 1);
        assert_eq!(s.files_skipped, 1);
    }

    #[test]
    fn detector_slots_are_index_aligned_and_sparse_in_snapshot() {
        let m = Metrics::new(vec![key(1), key(2)]);
        m.add_detector_invocation(1, Duration::from_nanos(250));
        m.add_detector_invocation(1, Duration::from_nanos(250));
        // Out-of-range index is ignored.
        m.add_detector_invocation(7, Duration::from_nanos(1));
        let s = m.snapshot();
        assert_eq!(s.detectors.len(), 1);
        assert_eq!(s.detectors[0].detector, key(2));
        assert_eq!(s.detectors[0].invocations, 2);
        assert_eq!(s.detectors[0].total_time_ns, 500);
    }
}
