//! HTML entity decoder.
//!
//! Handles the common named entities plus decimal (`&#65;`) and hex
//! (`&#x41;`) character references. Unknown or malformed entities are copied
//! through untouched.

use crate::chunk::{Chunk, DecoderTag};
use crate::decode::Decoder;

/// Longest entity body we attempt to parse (excluding `&` and `;`).
const MAX_ENTITY_LEN: usize = 10;

pub struct HtmlEntityDecoder;

impl Decoder for HtmlEntityDecoder {
    fn decoder_tag(&self) -> DecoderTag {
        DecoderTag::HtmlEntity
    }

    fn from_chunk(&self, chunk: &Chunk) -> Option<Chunk> {
        let data: &[u8] = &chunk.data;
        let mut out = Vec::with_capacity(data.len());
        let mut replaced = false;
        let mut i = 0usize;
        while i < data.len() {
            if data[i] == b'&' {
                if let Some((ch, consumed)) = parse_entity(&data[i..]) {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    i += consumed;
                    replaced = true;
                    continue;
                }
            }
            out.push(data[i]);
            i += 1;
        }
        if !replaced {
            return None;
        }
        Some(chunk.derive(out, DecoderTag::HtmlEntity))
    }
}

/// Parses one entity at the start of `rest` (which begins with `&`).
fn parse_entity(rest: &[u8]) -> Option<(char, usize)> {
    let semi = memchr::memchr(b';', &rest[1..rest.len().min(MAX_ENTITY_LEN + 2)])? + 1;
    let body = &rest[1..semi];
    if body.is_empty() {
        return None;
    }
    let consumed = semi + 1;

    if body[0] == b'#' {
        let digits = &body[1..];
        let code = if digits.first().is_some_and(|&b| b == b'x' || b == b'X') {
            u32::from_str_radix(std::str::from_utf8(&digits[1..]).ok()?, 16).ok()?
        } else {
            std::str::from_utf8(digits).ok()?.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(|c| (c, consumed));
    }

    let ch = match body {
        b"amp" => '&',
        b"lt" => '<',
        b"gt" => '>',
        b"quot" => '"',
        b"apos" => '\'',
        b"nbsp" => '\u{a0}',
        b"equals" => '=',
        b"sol" => '/',
        b"colon" => ':',
        b"comma" => ',',
        _ => return None,
    };
    Some((ch, consumed))
}
