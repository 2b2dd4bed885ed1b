//! Emitted credential-occurrence records.
//!
//! A [`Finding`] is a detector [`Candidate`] augmented with the provenance of
//! the chunk it came from, the decoder variant that surfaced it, and a line
//! offset computed by locating the raw bytes within the chunk.

use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkMetadata, DecoderTag, SourceType};
use crate::detect::{Candidate, VerificationStatus};

/// Result category used by the results filter and the exit-code decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Verified,
    Unverified,
    /// `verification_error` was set: the probe was indeterminate.
    Unknown,
    /// Unverified candidate suppressed by the entropy gate or the
    /// within-chunk unverified dedup.
    FilteredUnverified,
}

/// A credential occurrence ready for dispatch.
#[derive(Clone, Debug)]
pub struct Finding {
    pub candidate: Candidate,
    pub source_type: SourceType,
    pub source_name: String,
    pub source_id: i64,
    pub job_id: i64,
    pub metadata: ChunkMetadata,
    pub decoder_tag: DecoderTag,
    /// Zero-based line on which the raw bytes first appear in the chunk, or
    /// 0 when the raw bytes could not be located (e.g. composite raws).
    pub line: u64,
    /// Set when the candidate was suppressed as a filtered-unverified
    /// result; such findings only reach the sink when the results filter
    /// admits the `FilteredUnverified` category.
    pub filtered: bool,
}

impl Finding {
    /// Attaches chunk provenance to a candidate.
    pub fn from_candidate(candidate: Candidate, chunk: &Chunk) -> Self {
        let line = line_of(&chunk.data, &candidate.raw);
        Self {
            candidate,
            source_type: chunk.source_type,
            source_name: chunk.source_name.clone(),
            source_id: chunk.source_id,
            job_id: chunk.job_id,
            metadata: chunk.metadata.clone(),
            decoder_tag: chunk.decoder_tag,
            line,
            filtered: false,
        }
    }

    pub fn category(&self) -> FindingCategory {
        match self.candidate.status() {
            VerificationStatus::Verified => FindingCategory::Verified,
            VerificationStatus::Unknown => FindingCategory::Unknown,
            VerificationStatus::Unverified if self.filtered => {
                FindingCategory::FilteredUnverified
            }
            VerificationStatus::Unverified => FindingCategory::Unverified,
        }
    }
}

/// Zero-based line number of the first occurrence of `needle` in `hay`.
fn line_of(hay: &[u8], needle: &[u8]) -> u64 {
    if needle.is_empty() {
        return 0;
    }
    match memmem::find(hay, needle) {
        Some(pos) => memchr::memchr_iter(b'\n', &hay[..pos]).count() as u64,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::test_chunk;
    use crate::detect::{DetectorKey, DetectorType, VerificationError};

    fn cand(raw: &[u8]) -> Candidate {
        Candidate::new(
            DetectorKey {
                detector_type: DetectorType::Aws,
                version: 1,
            },
            raw.to_vec(),
        )
    }

    #[test]
    fn line_offset_counts_newlines_before_match() {
        let chunk = test_chunk(b"a\nb\nsecret=AKIA1234\nc");
        let f = Finding::from_candidate(cand(b"AKIA1234"), &chunk);
        assert_eq!(f.line, 2);
    }

    #[test]
    fn missing_raw_defaults_to_line_zero() {
        let chunk = test_chunk(b"nothing here");
        let f = Finding::from_candidate(cand(b"AKIA1234"), &chunk);
        assert_eq!(f.line, 0);
    }

    #[test]
    fn categories() {
        let chunk = test_chunk(b"AKIA1234");
        let mut f = Finding::from_candidate(cand(b"AKIA1234"), &chunk);
        assert_eq!(f.category(), FindingCategory::Unverified);
        f.filtered = true;
        assert_eq!(f.category(), FindingCategory::FilteredUnverified);
        f.candidate.verified = true;
        assert_eq!(f.category(), FindingCategory::Verified);
        f.candidate.verified = false;
        f.candidate.verification_error = Some(VerificationError::Timeout);
        assert_eq!(f.category(), FindingCategory::Unknown);
    }
}
