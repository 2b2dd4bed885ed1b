//! Binary content sniffing and the early skip-list.
//!
//! Detection is magic-byte based over the first ≤512 bytes. The skip-list
//! covers content classes that cannot contain recoverable text secrets in
//! practice (executables, images, compiled objects, media); skipped files
//! are counted, not errors.

use serde::{Deserialize, Serialize};

/// Binary content classes recognized by the sniffer.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryKind {
    Elf,
    MachO,
    PeExecutable,
    Wasm,
    JavaClass,
    Png,
    Jpeg,
    Gif,
    Bmp,
    Ico,
    Pdf,
    Mp3,
    Mp4,
    Ogg,
    Sqlite,
}

impl BinaryKind {
    pub fn mime(self) -> &'static str {
        match self {
            BinaryKind::Elf => "application/x-elf",
            BinaryKind::MachO => "application/x-mach-binary",
            BinaryKind::PeExecutable => "application/vnd.microsoft.portable-executable",
            BinaryKind::Wasm => "application/wasm",
            BinaryKind::JavaClass => "application/java-vm",
            BinaryKind::Png => "image/png",
            BinaryKind::Jpeg => "image/jpeg",
            BinaryKind::Gif => "image/gif",
            BinaryKind::Bmp => "image/bmp",
            BinaryKind::Ico => "image/x-icon",
            BinaryKind::Pdf => "application/pdf",
            BinaryKind::Mp3 => "audio/mpeg",
            BinaryKind::Mp4 => "video/mp4",
            BinaryKind::Ogg => "audio/ogg",
            BinaryKind::Sqlite => "application/vnd.sqlite3",
        }
    }
}

/// Sniffs a binary kind from a header slice (first ≤512 bytes).
pub fn sniff_binary(header: &[u8]) -> Option<BinaryKind> {
    if header.starts_with(&[0x7f, b'E', b'L', b'F']) {
        return Some(BinaryKind::Elf);
    }
    if header.starts_with(&[0xfe, 0xed, 0xfa, 0xce])
        || header.starts_with(&[0xfe, 0xed, 0xfa, 0xcf])
        || header.starts_with(&[0xce, 0xfa, 0xed, 0xfe])
        || header.starts_with(&[0xcf, 0xfa, 0xed, 0xfe])
    {
        return Some(BinaryKind::MachO);
    }
    if header.starts_with(b"MZ") {
        return Some(BinaryKind::PeExecutable);
    }
    if header.starts_with(&[0x00, b'a', b's', b'm']) {
        return Some(BinaryKind::Wasm);
    }
    if header.starts_with(&[0xca, 0xfe, 0xba, 0xbe]) {
        return Some(BinaryKind::JavaClass);
    }
    if header.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(BinaryKind::Png);
    }
    if header.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some(BinaryKind::Jpeg);
    }
    if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        return Some(BinaryKind::Gif);
    }
    if header.starts_with(b"BM") && header.len() >= 14 {
        return Some(BinaryKind::Bmp);
    }
    if header.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some(BinaryKind::Ico);
    }
    if header.starts_with(b"%PDF-") {
        return Some(BinaryKind::Pdf);
    }
    if header.starts_with(b"ID3") || header.starts_with(&[0xff, 0xfb]) {
        return Some(BinaryKind::Mp3);
    }
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return Some(BinaryKind::Mp4);
    }
    if header.starts_with(b"OggS") {
        return Some(BinaryKind::Ogg);
    }
    if header.starts_with(b"SQLite format 3\0") {
        return Some(BinaryKind::Sqlite);
    }
    None
}

/// Configurable set of binary kinds to discard early.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipList {
    kinds: Vec<BinaryKind>,
}

impl Default for SkipList {
    fn default() -> Self {
        Self {
            kinds: vec![
                BinaryKind::Elf,
                BinaryKind::MachO,
                BinaryKind::PeExecutable,
                BinaryKind::Wasm,
                BinaryKind::JavaClass,
                BinaryKind::Png,
                BinaryKind::Jpeg,
                BinaryKind::Gif,
                BinaryKind::Bmp,
                BinaryKind::Ico,
                BinaryKind::Mp3,
                BinaryKind::Mp4,
                BinaryKind::Ogg,
            ],
        }
    }
}

impl SkipList {
    pub fn new(kinds: Vec<BinaryKind>) -> Self {
        Self { kinds }
    }

    /// Empty list: nothing is skipped.
    pub fn none() -> Self {
        Self { kinds: Vec::new() }
    }

    /// Returns the matched kind when `header` sniffs to a skipped class.
    pub fn matches(&self, header: &[u8]) -> Option<BinaryKind> {
        let kind = sniff_binary(header)?;
        self.kinds.contains(&kind).then_some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_common_magics() {
        assert_eq!(
            sniff_binary(&[0x7f, b'E', b'L', b'F', 2, 1]),
            Some(BinaryKind::Elf)
        );
        assert_eq!(sniff_binary(b"MZ\x90\x00"), Some(BinaryKind::PeExecutable));
        assert_eq!(
            sniff_binary(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a]),
            Some(BinaryKind::Png)
        );
        assert_eq!(sniff_binary(b"plain text file"), None);
        assert_eq!(sniff_binary(b""), None);
    }

    #[test]
    fn skip_list_is_configurable() {
        let header = [0x89, b'P', b'N', b'G', 0, 0];
        assert_eq!(
            SkipList::default().matches(&header),
            Some(BinaryKind::Png)
        );
        assert_eq!(SkipList::none().matches(&header), None);
        let only_elf = SkipList::new(vec![BinaryKind::Elf]);
        assert_eq!(only_elf.matches(&header), None);
    }

    #[test]
    fn pdf_not_skipped_by_default() {
        // PDFs frequently embed extractable text; sniffed but not skipped.
        let list = SkipList::default();
        assert_eq!(list.matches(b"%PDF-1.7 ..."), None);
        assert_eq!(sniff_binary(b"%PDF-1.7 ..."), Some(BinaryKind::Pdf));
    }
}
