//! Chunk-level decoders expanding hidden-encoding forms of secrets.
//!
//! Every chunk is passed through each decoder. A decoder returns `None` when
//! it has nothing to transform, or a new chunk with rewritten bytes and its
//! [`DecoderTag`] set. Decoders apply independently: a chunk matching several
//! decoders fans out into several chunks, each preserving provenance and
//! re-entering the prefilter and detector fan-out exactly like a source
//! chunk.
//!
//! Decoding is best-effort: malformed input is never an error, just a `None`.

pub mod base64;
pub mod escaped;
pub mod html;
pub mod utf16;

use crate::chunk::{Chunk, DecoderTag};

pub use self::base64::Base64Decoder;
pub use self::escaped::EscapedUnicodeDecoder;
pub use self::html::HtmlEntityDecoder;
pub use self::utf16::Utf16Decoder;

pub trait Decoder: Send + Sync {
    fn decoder_tag(&self) -> DecoderTag;

    /// Returns a transformed chunk, or `None` when no transform applies.
    fn from_chunk(&self, chunk: &Chunk) -> Option<Chunk>;
}

/// Identity decoder. The stack forwards the undecoded chunk itself as the
/// `plain` variant, so this never produces a derived chunk; it exists so the
/// default decoder list is complete and ordered with `plain` first.
pub struct PlainDecoder;

impl Decoder for PlainDecoder {
    fn decoder_tag(&self) -> DecoderTag {
        DecoderTag::Plain
    }

    fn from_chunk(&self, _chunk: &Chunk) -> Option<Chunk> {
        None
    }
}

/// The full decoder list, `plain` first.
pub fn default_decoders() -> Vec<Box<dyn Decoder>> {
    vec![
        Box::new(PlainDecoder),
        Box::new(Base64Decoder::default()),
        Box::new(Utf16Decoder),
        Box::new(EscapedUnicodeDecoder),
        Box::new(HtmlEntityDecoder),
    ]
}

/// The decoder stage: expands one source chunk into its decoded family.
pub struct DecoderStack {
    decoders: Vec<Box<dyn Decoder>>,
}

impl DecoderStack {
    pub fn new(decoders: Vec<Box<dyn Decoder>>) -> Self {
        Self { decoders }
    }

    /// Expands `chunk` into the plain variant plus every decoder transform
    /// that applied. The plain variant is always first.
    pub fn expand(&self, chunk: Chunk) -> Vec<Chunk> {
        let mut derived = Vec::new();
        for decoder in &self.decoders {
            if decoder.decoder_tag() == DecoderTag::Plain {
                continue;
            }
            if let Some(decoded) = decoder.from_chunk(&chunk) {
                if !decoded.is_empty() {
                    derived.push(decoded);
                }
            }
        }
        let mut family = Vec::with_capacity(1 + derived.len());
        family.push(chunk);
        family.extend(derived);
        family
    }
}

impl Default for DecoderStack {
    fn default() -> Self {
        Self::new(default_decoders())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::test_chunk;
    use ::base64::engine::general_purpose::STANDARD;
    use ::base64::Engine as _;

    #[test]
    fn expand_keeps_plain_first() {
        let stack = DecoderStack::default();
        let encoded = STANDARD.encode(b"password=hunter2hunter2hunter2");
        let data = format!("prefix {encoded} suffix");
        let family = stack.expand(test_chunk(data.as_bytes()));
        assert!(family.len() >= 2);
        assert_eq!(family[0].decoder_tag, DecoderTag::Plain);
        assert!(family[1..]
            .iter()
            .all(|c| c.decoder_tag != DecoderTag::Plain));
    }

    #[test]
    fn plain_only_for_boring_bytes() {
        let stack = DecoderStack::default();
        let family = stack.expand(test_chunk(b"nothing encoded here"));
        assert_eq!(family.len(), 1);
        assert_eq!(family[0].decoder_tag, DecoderTag::Plain);
    }

    #[test]
    fn empty_chunk_yields_single_plain_variant() {
        let stack = DecoderStack::default();
        let family = stack.expand(test_chunk(b""));
        assert_eq!(family.len(), 1);
        assert!(family[0].is_empty());
    }
}
