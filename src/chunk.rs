//! The unit of work flowing through the pipeline.
//!
//! # Invariants
//! - A chunk's `data` is immutable once emitted from a producer. Decoders that
//!   transform content build a *new* chunk; nothing in the pipeline mutates a
//!   chunk in place.
//! - `decoder_tag` is `Plain` on every chunk leaving a source; only the
//!   decoder stage rewrites it.
//! - Chunks carry no shared mutable state and are moved (never cloned) across
//!   stage channels. `Clone` exists solely for the decoder fan-out, which
//!   needs the provenance fields on each derived chunk.

use std::path::PathBuf;

use serde::Serialize;

use crate::pool::PooledBytes;

/// Tag identifying the kind of producer a chunk came from.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Filesystem,
    Git,
    S3,
    Gcs,
    Docker,
    /// In-memory producer used by tests and embedders.
    Static,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Filesystem => "filesystem",
            SourceType::Git => "git",
            SourceType::S3 => "s3",
            SourceType::Gcs => "gcs",
            SourceType::Docker => "docker",
            SourceType::Static => "static",
        }
    }
}

/// Decoding applied to a chunk's bytes before scanning.
///
/// The deduplicator uses this to collapse the same secret discovered under
/// distinct decodings of one chunk into a single finding.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderTag {
    #[default]
    Plain,
    Base64,
    Utf16,
    EscapedUnicode,
    HtmlEntity,
}

impl DecoderTag {
    pub fn as_str(self) -> &'static str {
        match self {
            DecoderTag::Plain => "plain",
            DecoderTag::Base64 => "base64",
            DecoderTag::Utf16 => "utf16",
            DecoderTag::EscapedUnicode => "escaped-unicode",
            DecoderTag::HtmlEntity => "html-entity",
        }
    }
}

/// Provenance detail attached by the producing source.
///
/// Opaque to the core: it is stored on the chunk and copied verbatim onto
/// every finding the chunk yields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMetadata {
    #[default]
    None,
    File {
        path: PathBuf,
        /// Byte offset of this chunk within the file.
        offset: u64,
    },
    /// Entry inside a (possibly nested) container.
    Archive {
        /// `outer.zip!inner.tar!path/in/tar` style virtual path.
        virtual_path: String,
        depth: u8,
    },
    /// Escape hatch for out-of-tree sources.
    Custom(serde_json::Value),
}

/// A bounded byte window with provenance, the unit of work in the pipeline.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub source_type: SourceType,
    pub source_name: String,
    pub source_id: i64,
    pub job_id: i64,
    pub data: PooledBytes,
    pub metadata: ChunkMetadata,
    /// Whether candidates found in this chunk should be verified remotely.
    pub verify: bool,
    pub decoder_tag: DecoderTag,
}

impl Chunk {
    /// Builds a derived chunk carrying the same provenance but new bytes.
    ///
    /// Used by decoders; the derived chunk re-enters the pipeline exactly
    /// like a source chunk.
    pub fn derive(&self, data: Vec<u8>, tag: DecoderTag) -> Chunk {
        Chunk {
            source_type: self.source_type,
            source_name: self.source_name.clone(),
            source_id: self.source_id,
            job_id: self.job_id,
            data: PooledBytes::from(data),
            metadata: self.metadata.clone(),
            verify: self.verify,
            decoder_tag: tag,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_chunk(data: &[u8]) -> Chunk {
    Chunk {
        source_type: SourceType::Static,
        source_name: "test".into(),
        source_id: 0,
        job_id: 0,
        data: PooledBytes::from(data.to_vec()),
        metadata: ChunkMetadata::None,
        verify: false,
        decoder_tag: DecoderTag::Plain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_preserves_provenance_and_sets_tag() {
        let mut c = test_chunk(b"hello");
        c.source_name = "repo".into();
        c.verify = true;
        let d = c.derive(b"HELLO".to_vec(), DecoderTag::Base64);
        assert_eq!(d.source_name, "repo");
        assert!(d.verify);
        assert_eq!(d.decoder_tag, DecoderTag::Base64);
        assert_eq!(&*d.data, b"HELLO");
        // original untouched
        assert_eq!(&*c.data, b"hello");
        assert_eq!(c.decoder_tag, DecoderTag::Plain);
    }
}
