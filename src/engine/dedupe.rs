//! Cross-decoder deduplication within one chunk's fan-out.
//!
//! The decoder stage fans a chunk out into several decoded variants; a
//! secret visible in more than one of them must be emitted once. Scope is a
//! single chunk family only: two independent occurrences elsewhere in the
//! input are legitimately two findings, so no cross-chunk state exists.

use memchr::memmem;

use crate::detect::DetectorKey;

/// Delimiters trimmed before the near-duplicate comparison.
const TRIM_DELIMS: &[u8] = b"'\"`=:,; \t\r\n";

/// Maximum length difference for the near-duplicate rule.
const MAX_LEN_DIFF: usize = 4;

/// Duplicate suppression set for one chunk family.
///
/// A candidate is a duplicate of a stored one when:
/// - same detector key and same raw (or same composite raw), or
/// - different detector key, but the trimmed raws differ in length by at
///   most a small constant and one is a substring of the other. This is
///   what collapses "base64 of key X" against "key X".
#[derive(Default)]
pub struct ChunkDeduper {
    seen: Vec<SeenCandidate>,
}

struct SeenCandidate {
    key: DetectorKey,
    raw: Vec<u8>,
    raw_v2: Option<Vec<u8>>,
}

impl ChunkDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a candidate; returns `false` when it duplicates an earlier
    /// observation in this family.
    pub fn observe(&mut self, key: &DetectorKey, raw: &[u8], raw_v2: Option<&[u8]>) -> bool {
        let trimmed = trim_delims(raw);
        for prior in &self.seen {
            if prior.key == *key {
                if prior.raw == raw {
                    return false;
                }
                if let (Some(a), Some(b)) = (prior.raw_v2.as_deref(), raw_v2) {
                    if a == b {
                        return false;
                    }
                }
            } else {
                let prior_trimmed = trim_delims(&prior.raw);
                if near_duplicate(prior_trimmed, trimmed) {
                    return false;
                }
            }
        }
        self.seen.push(SeenCandidate {
            key: key.clone(),
            raw: raw.to_vec(),
            raw_v2: raw_v2.map(<[u8]>::to_vec),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn trim_delims(mut raw: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = raw.split_first() {
        if TRIM_DELIMS.contains(&first) {
            raw = rest;
        } else {
            break;
        }
    }
    while let Some((&last, rest)) = raw.split_last() {
        if TRIM_DELIMS.contains(&last) {
            raw = rest;
        } else {
            break;
        }
    }
    raw
}

fn near_duplicate(a: &[u8], b: &[u8]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if long.len() - short.len() > MAX_LEN_DIFF {
        return false;
    }
    memmem::find(long, short).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorType;

    fn key(t: DetectorType, version: u32) -> DetectorKey {
        DetectorKey {
            detector_type: t,
            version,
        }
    }

    #[test]
    fn exact_repeat_same_key_is_suppressed() {
        let mut d = ChunkDeduper::new();
        let k = key(DetectorType::Aws, 1);
        assert!(d.observe(&k, b"AKIA1234", None));
        assert!(!d.observe(&k, b"AKIA1234", None));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn different_raw_same_key_is_fresh() {
        let mut d = ChunkDeduper::new();
        let k = key(DetectorType::Aws, 1);
        assert!(d.observe(&k, b"AKIA1234", None));
        assert!(d.observe(&k, b"AKIA9999", None));
    }

    #[test]
    fn composite_raw_collision_same_key_is_suppressed() {
        let mut d = ChunkDeduper::new();
        let k = key(DetectorType::Twilio, 1);
        assert!(d.observe(&k, b"AC11", Some(b"AC11deadbeef")));
        assert!(!d.observe(&k, b"AC99", Some(b"AC11deadbeef")));
    }

    #[test]
    fn near_duplicate_across_keys_is_suppressed() {
        let mut d = ChunkDeduper::new();
        let a = key(DetectorType::Aws, 1);
        let b = key(DetectorType::Custom("other".into()), 1);
        assert!(d.observe(&a, b"AKIA12345678", None));
        // Same token wrapped in quotes, claimed by another detector.
        assert!(!d.observe(&b, b"\"AKIA12345678\"", None));
        // Genuinely different token is fresh.
        assert!(d.observe(&b, b"completely-different-token", None));
    }

    #[test]
    fn same_raw_different_keys_is_suppressed_as_near_duplicate() {
        let mut d = ChunkDeduper::new();
        let v1 = key(DetectorType::Github, 1);
        let v2 = key(DetectorType::Custom("gh".into()), 1);
        assert!(d.observe(&v1, b"ghp_tok", None));
        assert!(!d.observe(&v2, b"ghp_tok", None));
    }
}
