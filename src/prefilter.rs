//! Keyword prefilter: one Aho-Corasick pass gating the detector fan-out.
//!
//! # Invariants
//! - A detector is admitted iff at least one of its keywords appears
//!   (case-insensitively, unanchored) in the chunk bytes; the returned set is
//!   insertion-stable on first hit.
//! - Detectors with an empty keyword list are excluded at build time and can
//!   never be invoked.
//! - Built once over the full detector list; read-only afterwards and shared
//!   across all workers.
//!
//! # Design Notes
//! - Keywords are deduped across detectors; each automaton pattern fans out
//!   to one or more detector indices through a flat offsets/targets pair, so
//!   a match costs one slice lookup and no pointer chasing.

use ahash::AHashMap;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::sync::Arc;
use thiserror::Error;

use crate::detect::Detector;

#[derive(Clone, Debug, Error)]
pub enum PrefilterError {
    #[error("failed to build keyword automaton: {0}")]
    Build(String),
}

/// Immutable keyword index over the registered detectors.
pub struct KeywordIndex {
    ac: AhoCorasick,
    /// Prefix-sum table into `targets`, length = patterns + 1.
    offsets: Vec<u32>,
    /// Detector indices, grouped per pattern.
    targets: Vec<u32>,
    detector_count: usize,
}

impl KeywordIndex {
    /// Builds the automaton over the union of all detectors' keywords.
    ///
    /// `detectors` indexing is preserved: returned matches are indices into
    /// this slice.
    pub fn build(detectors: &[Arc<dyn Detector>]) -> Result<Self, PrefilterError> {
        // keyword bytes (lowercased for dedup) -> detector indices
        let mut pat_map: AHashMap<Vec<u8>, Vec<u32>> = AHashMap::new();
        let mut order: Vec<Vec<u8>> = Vec::new();
        for (idx, detector) in detectors.iter().enumerate() {
            for kw in detector.keywords() {
                if kw.is_empty() {
                    continue;
                }
                let pat = kw.to_ascii_lowercase().into_bytes();
                let entry = pat_map.entry(pat.clone()).or_insert_with(|| {
                    order.push(pat);
                    Vec::new()
                });
                if entry.last() != Some(&(idx as u32)) {
                    entry.push(idx as u32);
                }
            }
        }

        let mut offsets = Vec::with_capacity(order.len() + 1);
        let mut targets = Vec::new();
        offsets.push(0u32);
        for pat in &order {
            targets.extend_from_slice(&pat_map[pat]);
            offsets.push(targets.len() as u32);
        }

        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .prefilter(true)
            .build(order.iter().map(Vec::as_slice))
            .map_err(|e| PrefilterError::Build(e.to_string()))?;

        Ok(Self {
            ac,
            offsets,
            targets,
            detector_count: detectors.len(),
        })
    }

    /// Detector indices whose keyword set intersects `data`, ordered by
    /// first keyword hit.
    pub fn find_matches(&self, data: &[u8]) -> Vec<usize> {
        let mut seen = vec![false; self.detector_count];
        let mut out = Vec::new();
        for m in self.ac.find_overlapping_iter(data) {
            let pat = m.pattern().as_usize();
            let start = self.offsets[pat] as usize;
            let end = self.offsets[pat + 1] as usize;
            for &t in &self.targets[start..end] {
                let t = t as usize;
                if !seen[t] {
                    seen[t] = true;
                    out.push(t);
                }
            }
            if out.len() == self.detector_count {
                break;
            }
        }
        out
    }

    /// Number of distinct keyword patterns in the automaton.
    pub fn pattern_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScanContext;
    use crate::detect::{Candidate, DetectorType};

    struct FakeDetector {
        name: &'static str,
        keywords: Vec<String>,
    }

    impl Detector for FakeDetector {
        fn keywords(&self) -> &[String] {
            &self.keywords
        }

        fn from_data(&self, _cx: &ScanContext, _verify: bool, _data: &[u8]) -> Vec<Candidate> {
            Vec::new()
        }

        fn detector_type(&self) -> DetectorType {
            DetectorType::Custom(self.name.to_string())
        }
    }

    fn fake(name: &'static str, keywords: &[&str]) -> Arc<dyn Detector> {
        Arc::new(FakeDetector {
            name,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn matches_are_insertion_stable_and_deduped() {
        let detectors = vec![
            fake("a", &["akia"]),
            fake("b", &["token", "akia"]),
            fake("c", &["zebra"]),
        ];
        let idx = KeywordIndex::build(&detectors).unwrap();
        let hits = idx.find_matches(b"prefix AKIA token AKIA");
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn case_insensitive_unanchored() {
        let detectors = vec![fake("a", &["GhP_"])];
        let idx = KeywordIndex::build(&detectors).unwrap();
        assert_eq!(idx.find_matches(b"xxghp_yy"), vec![0]);
        assert_eq!(idx.find_matches(b"GHP_"), vec![0]);
        assert!(idx.find_matches(b"gh p_").is_empty());
    }

    #[test]
    fn empty_keyword_detector_is_never_admitted() {
        let detectors = vec![fake("none", &[]), fake("a", &["akia"])];
        let idx = KeywordIndex::build(&detectors).unwrap();
        assert_eq!(idx.find_matches(b"akia everything"), vec![1]);
    }

    #[test]
    fn shared_keyword_fans_out_to_all_owners() {
        let detectors = vec![fake("a", &["sid"]), fake("b", &["sid"])];
        let idx = KeywordIndex::build(&detectors).unwrap();
        assert_eq!(idx.pattern_count(), 1);
        assert_eq!(idx.find_matches(b"the sid here"), vec![0, 1]);
    }
}
