//! Engine configuration.
//!
//! Everything the pipeline used to reach for as ambient state (archive
//! limits, verification policy, worker counts, the HTTP client shape) is an
//! explicit field here, threaded through construction. Validation happens
//! once at startup; a configuration error aborts the run before any chunk is
//! emitted.

use std::collections::BTreeMap;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveConfig;
use crate::detect::{DetectorKey, DetectorType};
use crate::findings::FindingCategory;
use crate::reader::ReaderConfig;

/// Default bound for every inter-stage channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Categories of findings allowed through to the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsFilter {
    categories: Vec<FindingCategory>,
}

impl Default for ResultsFilter {
    fn default() -> Self {
        Self {
            categories: vec![
                FindingCategory::Verified,
                FindingCategory::Unverified,
                FindingCategory::Unknown,
            ],
        }
    }
}

impl ResultsFilter {
    pub fn new(categories: Vec<FindingCategory>) -> Self {
        Self { categories }
    }

    pub fn admits(&self, category: FindingCategory) -> bool {
        self.categories.contains(&category)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Per-detector verification override, exact-version or wildcard.
///
/// An entry with `version == None` matches every version of the detector
/// type; an exact entry wins over a wildcard.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DetectorOverrides {
    entries: Vec<(DetectorType, Option<u32>, bool)>,
}

impl DetectorOverrides {
    pub fn force(&mut self, detector_type: DetectorType, version: Option<u32>, verify: bool) {
        self.entries.push((detector_type, version, verify));
    }

    /// Resolves the effective verification flag for a detector, falling back
    /// to the chunk's global flag when no override matches.
    pub fn effective_verify(&self, key: &DetectorKey, chunk_verify: bool) -> bool {
        let mut wildcard = None;
        for (ty, version, verify) in &self.entries {
            if *ty != key.detector_type {
                continue;
            }
            match version {
                Some(v) if *v == key.version => return *verify,
                None => wildcard = Some(*verify),
                _ => {}
            }
        }
        wildcard.unwrap_or(chunk_verify)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared HTTP client policy for detector verification calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Allow redirects into loopback/private address space. Testing only.
    pub allow_unsafe_redirects: bool,
    /// Secret-material substrings scrubbed from all log output.
    pub redact: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            allow_unsafe_redirects: false,
            redact: Vec::new(),
        }
    }
}

/// Top-level engine configuration.
///
/// Worker counts of `0` mean "resolve to the logical CPU count at startup".
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Detector/verifier stage workers.
    pub detector_workers: usize,
    /// Decoder stage workers.
    pub decoder_workers: usize,
    /// Bound for every inter-stage channel; `0` means the default (64).
    pub channel_capacity: usize,

    /// Global verification request flag stamped onto produced chunks.
    pub verify: bool,
    /// Verify every overlapping claim instead of only the highest version.
    pub verify_all_overlaps: bool,
    /// Emit only the first unverified candidate per detector per chunk.
    pub filter_unverified: bool,
    /// Entropy floor (bits/byte) for unverified candidates; `None` disables
    /// the gate.
    pub entropy_floor: Option<f32>,

    pub results: ResultsFilter,
    pub overrides: DetectorOverrides,
    /// Custom verification endpoints keyed by detector name.
    pub endpoints: BTreeMap<String, String>,

    pub http: HttpConfig,
    pub reader: ReaderConfig,
    pub archive: ArchiveConfig,

    /// Pin source concurrency to one producer so chunk order follows the
    /// source's native ordering (the base-commit constraint).
    pub preserve_source_order: bool,
    /// Treat a sink dispatch error as fatal for the scan.
    pub sink_errors_fatal: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detector_workers: 0,
            decoder_workers: 0,
            channel_capacity: 0,
            verify: false,
            verify_all_overlaps: false,
            filter_unverified: true,
            entropy_floor: None,
            results: ResultsFilter::default(),
            overrides: DetectorOverrides::default(),
            endpoints: BTreeMap::new(),
            http: HttpConfig::default(),
            reader: ReaderConfig::default(),
            archive: ArchiveConfig::default(),
            preserve_source_order: false,
            sink_errors_fatal: false,
        }
    }
}

/// Startup-fatal configuration problem.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("results filter admits no categories")]
    EmptyResultsFilter,
    #[error("entropy floor {0} outside [0.0, 8.0] bits/byte")]
    EntropyFloorOutOfRange(String),
    #[error("http timeout must be > 0 seconds")]
    ZeroHttpTimeout,
    #[error("{0}")]
    Reader(#[from] crate::reader::ReaderConfigError),
    #[error("{0}")]
    Archive(#[from] crate::archive::ArchiveConfigError),
}

impl EngineConfig {
    /// Cross-field invariant checks. Cheap; call once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.results.is_empty() {
            return Err(ConfigError::EmptyResultsFilter);
        }
        if let Some(floor) = self.entropy_floor {
            if !(0.0..=8.0).contains(&floor) {
                return Err(ConfigError::EntropyFloorOutOfRange(floor.to_string()));
            }
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::ZeroHttpTimeout);
        }
        self.reader.validate()?;
        self.archive.validate()?;
        Ok(())
    }

    pub fn resolved_detector_workers(&self) -> usize {
        resolve_workers(self.detector_workers)
    }

    pub fn resolved_decoder_workers(&self) -> usize {
        resolve_workers(self.decoder_workers)
    }

    pub fn resolved_channel_capacity(&self) -> usize {
        if self.channel_capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            self.channel_capacity
        }
    }
}

fn resolve_workers(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Normalizes a repeatable list flag that is documented both as
/// comma-separated and as repeat-this-flag: every element of `values` is
/// additionally split on commas, entries trimmed, empties dropped. Both
/// interpretations are accepted simultaneously, so
/// `--include-buckets a,b --include-buckets c` yields `[a, b, c]`.
pub fn normalize_multi_values(values: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for v in values {
        for part in v.split(',') {
            let part = part.trim();
            if !part.is_empty() {
                out.push(part.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert!(cfg.filter_unverified, "unverified filtering is on by default");
        assert!(cfg.resolved_detector_workers() >= 1);
        assert_eq!(cfg.resolved_channel_capacity(), DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn empty_results_filter_rejected() {
        let cfg = EngineConfig {
            results: ResultsFilter::new(vec![]),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::EmptyResultsFilter);
    }

    #[test]
    fn entropy_floor_bounds() {
        let cfg = EngineConfig {
            entropy_floor: Some(9.5),
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::EntropyFloorOutOfRange(_)
        ));
    }

    #[test]
    fn override_exact_beats_wildcard() {
        let mut o = DetectorOverrides::default();
        o.force(DetectorType::Aws, None, false);
        o.force(DetectorType::Aws, Some(2), true);
        let v1 = DetectorKey {
            detector_type: DetectorType::Aws,
            version: 1,
        };
        let v2 = DetectorKey {
            detector_type: DetectorType::Aws,
            version: 2,
        };
        assert!(!o.effective_verify(&v1, true), "wildcard disables v1");
        assert!(o.effective_verify(&v2, false), "exact enables v2");
        let twilio = DetectorKey {
            detector_type: DetectorType::Twilio,
            version: 1,
        };
        assert!(o.effective_verify(&twilio, true), "unmatched falls back");
    }

    #[test]
    fn multi_value_normalization_accepts_both_shapes() {
        let values = vec![
            "a,b".to_string(),
            "c".to_string(),
            " d , ".to_string(),
            String::new(),
        ];
        assert_eq!(normalize_multi_values(&values), vec!["a", "b", "c", "d"]);
    }
}
