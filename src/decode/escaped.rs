//! Backslash-escaped unicode decoder (`\uXXXX`, `\UXXXXXXXX`).
//!
//! Surrogate pairs spelled as two consecutive `\uXXXX` escapes are combined;
//! lone surrogates and out-of-range `\U` values are left as-is.

use crate::chunk::{Chunk, DecoderTag};
use crate::decode::Decoder;

pub struct EscapedUnicodeDecoder;

impl Decoder for EscapedUnicodeDecoder {
    fn decoder_tag(&self) -> DecoderTag {
        DecoderTag::EscapedUnicode
    }

    fn from_chunk(&self, chunk: &Chunk) -> Option<Chunk> {
        let data: &[u8] = &chunk.data;
        let mut out = Vec::with_capacity(data.len());
        let mut replaced = false;
        let mut i = 0usize;
        while i < data.len() {
            match parse_escape(&data[i..]) {
                Some((ch, consumed)) => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    i += consumed;
                    replaced = true;
                }
                None => {
                    out.push(data[i]);
                    i += 1;
                }
            }
        }
        if !replaced {
            return None;
        }
        Some(chunk.derive(out, DecoderTag::EscapedUnicode))
    }
}

/// Parses one escape at the start of `rest`, returning the decoded char and
/// the number of input bytes consumed.
fn parse_escape(rest: &[u8]) -> Option<(char, usize)> {
    if rest.len() < 6 || rest[0] != b'\\' {
        return None;
    }
    match rest[1] {
        b'u' => {
            let hi = hex4(&rest[2..6])?;
            if (0xD800..=0xDBFF).contains(&hi) {
                // High surrogate: require an immediately following low half.
                if rest.len() >= 12 && rest[6] == b'\\' && rest[7] == b'u' {
                    let lo = hex4(&rest[8..12])?;
                    if (0xDC00..=0xDFFF).contains(&lo) {
                        let code =
                            0x10000 + ((hi as u32 - 0xD800) << 10) + (lo as u32 - 0xDC00);
                        return char::from_u32(code).map(|c| (c, 12));
                    }
                }
                return None;
            }
            if (0xDC00..=0xDFFF).contains(&hi) {
                return None;
            }
            char::from_u32(hi as u32).map(|c| (c, 6))
        }
        b'U' if rest.len() >= 10 => {
            let code = hex_u32(&rest[2..10])?;
            char::from_u32(code).map(|c| (c, 10))
        }
        _ => None,
    }
}

fn hex4(digits: &[u8]) -> Option<u16> {
    let mut v = 0u16;
    for &d in digits {
        v = v.checked_mul(16)?;
        v += hex_digit(d)? as u16;
    }
    Some(v)
}

fn hex_u32(digits: &[u8]) -> Option<u32> {
    let mut v = 0u32;
    for &d in digits {
        v = v.checked_mul(16)?;
        v += hex_digit(d)? as u32;
    }
    Some(v)
}

fn hex_digit(d: u8) -> Option<u8> {
    match d {
        b'0'..=b'9' => Some(d - b'0'),
        b'a'..=b'f' => Some(d - b'a' + 10),
        b'A'..=b'F' => Some(d - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::test_chunk;

    fn esc4(cp: u16) -> String {
        format!("{}u{:04x}", '\\', cp)
    }

    fn esc8(cp: u32) -> String {
        format!("{}U{:08X}", '\\', cp)
    }

    #[test]
    fn decodes_bmp_escapes() {
        let data = format!(
            "token={}{}{}{} rest",
            esc4(0x41),
            esc4(0x4b),
            esc4(0x49),
            esc4(0x41)
        );
        let out = EscapedUnicodeDecoder
            .from_chunk(&test_chunk(data.as_bytes()))
            .unwrap();
        assert_eq!(&*out.data, b"token=AKIA rest");
    }

    #[test]
    fn decodes_surrogate_pair_and_long_form() {
        let data = format!("{}{} and {}", esc4(0xd83d), esc4(0xde00), esc8(0x1F600));
        let out = EscapedUnicodeDecoder
            .from_chunk(&test_chunk(data.as_bytes()))
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.data), "\u{1F600} and \u{1F600}");
    }

    #[test]
    fn lone_surrogate_is_preserved_verbatim() {
        let data = format!("x {} y {}", esc4(0xd800), esc4(0x41));
        let out = EscapedUnicodeDecoder
            .from_chunk(&test_chunk(data.as_bytes()))
            .unwrap();
        let expected = format!("x {} y A", esc4(0xd800));
        assert_eq!(String::from_utf8_lossy(&out.data), expected);
    }

    #[test]
    fn no_escapes_means_no_transform() {
        assert!(EscapedUnicodeDecoder
            .from_chunk(&test_chunk(b"plain text"))
            .is_none());
    }
}
