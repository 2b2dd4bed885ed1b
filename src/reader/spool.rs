//! Threshold-spilling reader.
//!
//! # Invariants
//! - At most `threshold` bytes are ever resident in the in-memory buffer;
//!   the byte after that boundary forces migration to a spill file.
//! - Materialization is lazy: bytes are pulled from the inner reader only as
//!   far as the current operation needs, except `SeekFrom::End`, which
//!   materializes everything.
//! - Spill files live in the system temp dir under a process-prefixed name
//!   and are unlinked when the reader drops.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process;

use tempfile::NamedTempFile;

/// Common prefix for all spill artifacts, across runs.
const SPOOL_PREFIX: &str = "credsweep-spool-";

fn spool_prefix_current() -> String {
    format!("{SPOOL_PREFIX}{}-", process::id())
}

/// Removes spill files left behind by prior (crashed or killed) runs.
///
/// Files belonging to the current process are left alone. Returns the number
/// of artifacts unlinked. Called at engine startup and on cancellation.
pub fn sweep_stale_spool_files() -> usize {
    let own = spool_prefix_current();
    let mut removed = 0usize;
    let Ok(entries) = fs::read_dir(std::env::temp_dir()) else {
        return 0;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(SPOOL_PREFIX)
            && !name.starts_with(&own)
            && fs::remove_file(entry.path()).is_ok()
        {
            removed += 1;
        }
    }
    removed
}

enum Backing {
    Memory(Vec<u8>),
    Spilled(NamedTempFile),
}

/// Lazily-materializing reader over an arbitrary byte stream.
pub struct SpoolingReader<R> {
    inner: Option<R>,
    backing: Backing,
    threshold: u64,
    /// Bytes materialized so far.
    len: u64,
    /// Read cursor.
    pos: u64,
}

impl<R: Read> SpoolingReader<R> {
    pub fn new(inner: R, threshold: u64) -> Self {
        assert!(threshold > 0, "spill threshold must be > 0");
        Self {
            inner: Some(inner),
            backing: Backing::Memory(Vec::new()),
            threshold,
            len: 0,
            pos: 0,
        }
    }

    /// True once content has migrated to a temporary file.
    pub fn is_spilled(&self) -> bool {
        matches!(self.backing, Backing::Spilled(_))
    }

    /// Bytes materialized so far; the total size once EOF has been reached.
    pub fn materialized_len(&self) -> u64 {
        self.len
    }

    /// Peeks up to `n` bytes from the current cursor without consuming them.
    pub fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.fill_to(self.pos.saturating_add(n as u64))?;
        let avail = (self.len.saturating_sub(self.pos) as usize).min(n);
        let mut out = vec![0u8; avail];
        self.read_at(self.pos, &mut out)?;
        Ok(out)
    }

    /// Pulls bytes from the inner reader until `target` bytes are
    /// materialized or the stream ends.
    fn fill_to(&mut self, target: u64) -> io::Result<()> {
        while self.len < target {
            let Some(inner) = self.inner.as_mut() else {
                return Ok(());
            };
            let mut buf = [0u8; 64 * 1024];
            let want = buf.len().min((target - self.len).max(4096) as usize);
            let n = inner.read(&mut buf[..want])?;
            if n == 0 {
                self.inner = None;
                return Ok(());
            }
            self.append(&buf[..n])?;
        }
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let needs_spill = match &self.backing {
            Backing::Memory(buf) => buf.len() as u64 + bytes.len() as u64 > self.threshold,
            Backing::Spilled(_) => false,
        };
        if needs_spill {
            self.migrate_to_file()?;
        }
        match &mut self.backing {
            Backing::Memory(buf) => buf.extend_from_slice(bytes),
            Backing::Spilled(file) => {
                let f = file.as_file_mut();
                f.seek(SeekFrom::End(0))?;
                f.write_all(bytes)?;
            }
        }
        self.len += bytes.len() as u64;
        Ok(())
    }

    fn migrate_to_file(&mut self) -> io::Result<()> {
        let Backing::Memory(buf) = &self.backing else {
            return Ok(());
        };
        let mut file = tempfile::Builder::new()
            .prefix(&spool_prefix_current())
            .tempfile()?;
        file.write_all(buf)?;
        self.backing = Backing::Spilled(file);
        Ok(())
    }

    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> io::Result<usize> {
        let avail = self.len.saturating_sub(offset);
        let take = (avail as usize).min(out.len());
        if take == 0 {
            return Ok(0);
        }
        match &mut self.backing {
            Backing::Memory(buf) => {
                let start = offset as usize;
                out[..take].copy_from_slice(&buf[start..start + take]);
            }
            Backing::Spilled(file) => {
                let f = file.as_file_mut();
                f.seek(SeekFrom::Start(offset))?;
                f.read_exact(&mut out[..take])?;
            }
        }
        Ok(take)
    }

    /// Materializes the remainder of the stream.
    fn fill_all(&mut self) -> io::Result<()> {
        while self.inner.is_some() {
            self.fill_to(self.len + 64 * 1024)?;
        }
        Ok(())
    }
}

impl<R: Read> Read for SpoolingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.fill_to(self.pos.saturating_add(out.len() as u64))?;
        let n = self.read_at(self.pos, out)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for SpoolingReader<R> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => {
                self.fill_all()?;
                self.len as i64 + d
            }
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_input_stays_in_memory() {
        let mut r = SpoolingReader::new(&b"hello world"[..], 1024);
        let mut out = String::new();
        r.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
        assert!(!r.is_spilled());
    }

    #[test]
    fn threshold_boundary_is_exact() {
        // Exactly at threshold: no spill.
        let data = vec![7u8; 100];
        let mut r = SpoolingReader::new(&data[..], 100);
        std::io::copy(&mut r, &mut std::io::sink()).unwrap();
        assert!(!r.is_spilled());

        // One byte over: spills.
        let data = vec![7u8; 101];
        let mut r = SpoolingReader::new(&data[..], 100);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert!(r.is_spilled());
        assert_eq!(out, data);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut r = SpoolingReader::new(&b"abcdef"[..], 1024);
        assert_eq!(r.peek(3).unwrap(), b"abc");
        assert_eq!(r.peek(100).unwrap(), b"abcdef");
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn seek_roundtrip_across_spill() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut r = SpoolingReader::new(&data[..], 512);
        r.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(r.materialized_len(), 4096);
        r.seek(SeekFrom::Start(1000)).unwrap();
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &data[1000..1004]);
        assert!(r.is_spilled());
    }

    #[test]
    fn sweep_ignores_current_process_files() {
        // Plant a fake stale artifact and a current-process artifact.
        let dir = std::env::temp_dir();
        let stale = dir.join(format!("{SPOOL_PREFIX}0-fake"));
        fs::write(&stale, b"x").unwrap();
        let own = dir.join(format!("{}keep", spool_prefix_current()));
        fs::write(&own, b"x").unwrap();

        sweep_stale_spool_files();
        assert!(!stale.exists(), "stale artifact should be removed");
        assert!(own.exists(), "own artifact must survive");
        fs::remove_file(&own).ok();
    }
}
