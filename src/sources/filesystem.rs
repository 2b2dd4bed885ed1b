//! Filesystem source adapter.
//!
//! Walks a directory tree in sorted order (stable chunk ordering per
//! source), sniffs each file, discards skip-listed binaries, expands
//! recognized containers through the archive tier, and chunks everything
//! else with a small overlap so matches spanning a chunk boundary are not
//! lost. Chunk buffers come from the shared pool and travel by ownership.

use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::archive::{
    detect_kind_from_name_bytes, expand_archive, sniff_archive, ArchiveConfig, ArchiveKind,
    ProcessingWarning,
};
use crate::chunk::{Chunk, ChunkMetadata, DecoderTag, SourceType};
use crate::context::ScanContext;
use crate::pool::{BufferPool, PooledBytes};
use crate::reader::{ReaderConfig, SpoolingReader};

use super::{ChunkReporter, Source, SourceError, UnitChunker, UnitId, UnitReporter};

/// Bytes per chunk, excluding the overlap carried from the previous chunk.
const CHUNK_SIZE: usize = 10 * 1024;

/// Overlap bytes copied from the previous chunk's tail.
const CHUNK_OVERLAP: usize = 3 * 1024;

/// Read buffers retained by the pool.
const POOL_CAPACITY: usize = 32;

pub struct FilesystemSource {
    root: PathBuf,
    name: String,
    job_id: i64,
    source_id: i64,
    verify: bool,
    reader_cfg: ReaderConfig,
    archive_cfg: ArchiveConfig,
    pool: BufferPool,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>, reader_cfg: ReaderConfig, archive_cfg: ArchiveConfig) -> Self {
        Self {
            root: root.into(),
            name: String::new(),
            job_id: 0,
            source_id: 0,
            verify: false,
            reader_cfg,
            archive_cfg,
            pool: BufferPool::new(POOL_CAPACITY),
        }
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>, errs: &mut Vec<SourceError>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                errs.push(SourceError::Io {
                    path: dir.to_path_buf(),
                    source: e,
                });
                return;
            }
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            if meta.is_dir() {
                self.walk(&path, out, errs);
            } else if meta.is_file() {
                out.push(path);
            }
        }
    }

    fn scan_file(
        &self,
        cx: &ScanContext,
        reporter: &ChunkReporter,
        path: &Path,
    ) -> Result<(), SourceError> {
        let file = File::open(path).map_err(|e| SourceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut reader = SpoolingReader::new(file, self.reader_cfg.spill_threshold);
        let header = reader.peek(self.reader_cfg.peek_len).map_err(|e| SourceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        if self.reader_cfg.skip.matches(&header).is_some() {
            reporter.note_file_skipped();
            return Ok(());
        }

        if self.archive_cfg.enabled {
            if let Some(kind) = container_kind(path, &header) {
                return self.scan_archive(cx, reporter, reader, path, kind);
            }
        }
        self.emit_stream_chunks(cx, reporter, &mut reader, path)
    }

    fn scan_archive(
        &self,
        cx: &ScanContext,
        reporter: &ChunkReporter,
        reader: SpoolingReader<File>,
        path: &Path,
        kind: ArchiveKind,
    ) -> Result<(), SourceError> {
        let root_name = path.to_string_lossy().into_owned();
        let mut send_failed = false;
        let report = expand_archive(
            cx,
            &self.archive_cfg,
            &self.reader_cfg.skip,
            kind,
            reader,
            &root_name,
            &mut |entry| {
                let metadata = ChunkMetadata::Archive {
                    virtual_path: entry.virtual_path,
                    depth: entry.depth,
                };
                match self.emit_blob_chunks(cx, reporter, entry.data, metadata) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => {
                        send_failed = true;
                        ControlFlow::Break(())
                    }
                }
            },
        );

        for warning in &report.warnings {
            tracing::warn!(source = %self.name, "{warning}");
            if matches!(warning, ProcessingWarning::TimeBudgetExceeded { .. }) {
                reporter.note_processing_timeout();
            }
        }
        for _ in 0..report.entries_skipped_binary {
            reporter.note_file_skipped();
        }
        if send_failed {
            return Err(SourceError::ChannelClosed);
        }
        Ok(())
    }

    /// Chunks an in-memory blob (an archive entry) with overlap.
    fn emit_blob_chunks(
        &self,
        cx: &ScanContext,
        reporter: &ChunkReporter,
        data: Vec<u8>,
        metadata: ChunkMetadata,
    ) -> Result<(), SourceError> {
        if data.len() <= CHUNK_SIZE + CHUNK_OVERLAP {
            return reporter.chunk_ok(self.make_chunk(PooledBytes::from(data), metadata));
        }
        let mut start = 0usize;
        while start < data.len() {
            if cx.is_cancelled() {
                return Ok(());
            }
            let end = (start + CHUNK_SIZE + CHUNK_OVERLAP).min(data.len());
            let window = data[start..end].to_vec();
            reporter.chunk_ok(self.make_chunk(PooledBytes::from(window), metadata.clone()))?;
            if end == data.len() {
                break;
            }
            start += CHUNK_SIZE;
        }
        Ok(())
    }

    /// Streams a file as fixed-size chunks, carrying an overlap prefix so a
    /// match straddling two chunks still appears whole in one of them.
    fn emit_stream_chunks(
        &self,
        cx: &ScanContext,
        reporter: &ChunkReporter,
        reader: &mut SpoolingReader<File>,
        path: &Path,
    ) -> Result<(), SourceError> {
        let mut tail: Vec<u8> = Vec::with_capacity(CHUNK_OVERLAP);
        let mut offset = 0u64;
        loop {
            if cx.is_cancelled() {
                return Ok(());
            }
            let mut buf = self.pool.acquire();
            let v = buf.as_mut_vec();
            v.extend_from_slice(&tail);
            let prefix = v.len();
            v.resize(prefix + CHUNK_SIZE, 0);
            let n = read_full(reader, &mut v[prefix..]).map_err(|e| SourceError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            v.truncate(prefix + n);
            if n == 0 {
                return Ok(());
            }

            let keep = CHUNK_OVERLAP.min(v.len());
            tail.clear();
            tail.extend_from_slice(&v[v.len() - keep..]);

            let metadata = ChunkMetadata::File {
                path: path.to_path_buf(),
                offset: offset.saturating_sub(prefix as u64),
            };
            reporter.chunk_ok(self.make_chunk(buf, metadata))?;
            offset += n as u64;
        }
    }

    fn make_chunk(&self, data: PooledBytes, metadata: ChunkMetadata) -> Chunk {
        Chunk {
            source_type: SourceType::Filesystem,
            source_name: self.name.clone(),
            source_id: self.source_id,
            job_id: self.job_id,
            data,
            metadata,
            verify: self.verify,
            decoder_tag: DecoderTag::Plain,
        }
    }
}

/// Container detection for a file: extension wins for the `.tar.gz` chain
/// (magic alone cannot see past the gzip wrapper), magic wins otherwise.
fn container_kind(path: &Path, header: &[u8]) -> Option<ArchiveKind> {
    let name_kind = path
        .file_name()
        .and_then(|n| detect_kind_from_name_bytes(n.to_string_lossy().as_bytes()));
    match sniff_archive(header) {
        Some(Ok(ArchiveKind::Gzip)) if name_kind == Some(ArchiveKind::TarGz) => {
            Some(ArchiveKind::TarGz)
        }
        Some(Ok(kind)) => Some(kind),
        Some(Err(_)) => None,
        None => name_kind,
    }
}

fn read_full(reader: &mut impl Read, mut out: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0usize;
    while !out.is_empty() {
        let n = reader.read(out)?;
        if n == 0 {
            break;
        }
        total += n;
        out = &mut out[n..];
    }
    Ok(total)
}

impl Source for FilesystemSource {
    fn init(
        &mut self,
        name: &str,
        job_id: i64,
        source_id: i64,
        verify: bool,
        _config: Option<&serde_json::Value>,
        _concurrency: usize,
    ) -> Result<(), SourceError> {
        if !self.root.exists() {
            return Err(SourceError::Init(format!(
                "scan root does not exist: {}",
                self.root.display()
            )));
        }
        self.name = name.to_string();
        self.job_id = job_id;
        self.source_id = source_id;
        self.verify = verify;
        Ok(())
    }

    fn chunks(&mut self, cx: &ScanContext, reporter: &ChunkReporter) -> Result<(), SourceError> {
        let mut files = Vec::new();
        let mut errs = Vec::new();
        if self.root.is_file() {
            files.push(self.root.clone());
        } else {
            self.walk(&self.root.clone(), &mut files, &mut errs);
        }
        for err in &errs {
            reporter.chunk_err(err);
        }
        for path in files {
            if cx.is_cancelled() {
                return Ok(());
            }
            match self.scan_file(cx, reporter, &path) {
                Ok(()) => {}
                Err(SourceError::ChannelClosed) => return Err(SourceError::ChannelClosed),
                Err(err) => reporter.chunk_err(&err),
            }
        }
        Ok(())
    }

    fn source_type(&self) -> SourceType {
        SourceType::Filesystem
    }

    fn source_id(&self) -> i64 {
        self.source_id
    }

    fn job_id(&self) -> i64 {
        self.job_id
    }

    fn as_unit_chunker(&mut self) -> Option<&mut dyn UnitChunker> {
        Some(self)
    }
}

impl UnitChunker for FilesystemSource {
    fn enumerate(
        &mut self,
        cx: &ScanContext,
        reporter: &mut dyn UnitReporter,
    ) -> Result<(), SourceError> {
        let mut files = Vec::new();
        let mut errs = Vec::new();
        if self.root.is_file() {
            files.push(self.root.clone());
        } else {
            self.walk(&self.root.clone(), &mut files, &mut errs);
        }
        for err in errs {
            reporter.unit_err(err);
        }
        for path in files {
            if cx.is_cancelled() {
                return Ok(());
            }
            reporter.unit_ok(UnitId(path.to_string_lossy().into_owned()));
        }
        Ok(())
    }

    fn chunk_unit(
        &mut self,
        cx: &ScanContext,
        unit: &UnitId,
        reporter: &ChunkReporter,
    ) -> Result<(), SourceError> {
        self.scan_file(cx, reporter, Path::new(&unit.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::engine::Metrics;
    use crate::sources::CollectUnits;
    use std::sync::Arc;

    fn run_source(dir: &Path) -> Vec<Chunk> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let reporter = ChunkReporter::new(tx, Arc::new(Metrics::new(Vec::new())));
        let cx = ScanContext::new(CancellationToken::new());
        let mut src =
            FilesystemSource::new(dir, ReaderConfig::default(), ArchiveConfig::default());
        src.init("fs", 1, 1, false, None, 1).unwrap();
        src.chunks(&cx, &reporter).unwrap();
        drop(reporter);
        rx.iter().collect()
    }

    #[test]
    fn walks_sorted_and_chunks_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bravo").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let chunks = run_source(dir.path());
        assert_eq!(chunks.len(), 2);
        assert_eq!(&*chunks[0].data, b"alpha");
        assert_eq!(&*chunks[1].data, b"bravo");
        match &chunks[0].metadata {
            ChunkMetadata::File { path, offset } => {
                assert!(path.ends_with("a.txt"));
                assert_eq!(*offset, 0);
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn large_file_chunks_carry_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![b'x'; CHUNK_SIZE + 100];
        std::fs::write(dir.path().join("big.bin"), &data).unwrap();
        let chunks = run_source(dir.path());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].data.len(), CHUNK_SIZE);
        // Second chunk = overlap prefix + remainder.
        assert_eq!(chunks[1].data.len(), CHUNK_OVERLAP + 100);
        match &chunks[1].metadata {
            ChunkMetadata::File { offset, .. } => {
                assert_eq!(*offset, (CHUNK_SIZE - CHUNK_OVERLAP) as u64)
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn binary_files_are_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut png = vec![0x89, b'P', b'N', b'G'];
        png.extend_from_slice(&[0u8; 64]);
        std::fs::write(dir.path().join("img.png"), &png).unwrap();
        std::fs::write(dir.path().join("ok.txt"), b"text").unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let metrics = Arc::new(Metrics::new(Vec::new()));
        let reporter = ChunkReporter::new(tx, Arc::clone(&metrics));
        let cx = ScanContext::new(CancellationToken::new());
        let mut src = FilesystemSource::new(
            dir.path(),
            ReaderConfig::default(),
            ArchiveConfig::default(),
        );
        src.init("fs", 0, 0, false, None, 1).unwrap();
        src.chunks(&cx, &reporter).unwrap();
        drop(reporter);

        let chunks: Vec<Chunk> = rx.iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(metrics.snapshot().files_skipped, 1);
    }

    #[test]
    fn archive_file_yields_entry_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in [("one.txt", b"first entry" as &[u8]), ("two.txt", b"second")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        std::fs::write(dir.path().join("bundle.tar"), &tar).unwrap();

        let chunks = run_source(dir.path());
        assert_eq!(chunks.len(), 2);
        match &chunks[0].metadata {
            ChunkMetadata::Archive { virtual_path, depth } => {
                assert!(virtual_path.ends_with("bundle.tar!one.txt"));
                assert_eq!(*depth, 1);
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn enumerate_then_chunk_unit_matches_direct_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"unit content").unwrap();
        let mut src = FilesystemSource::new(
            dir.path(),
            ReaderConfig::default(),
            ArchiveConfig::default(),
        );
        src.init("fs", 0, 0, false, None, 1).unwrap();
        let cx = ScanContext::new(CancellationToken::new());

        let mut units = CollectUnits::default();
        src.as_unit_chunker()
            .unwrap()
            .enumerate(&cx, &mut units)
            .unwrap();
        assert_eq!(units.units.len(), 1);

        let (tx, rx) = crossbeam_channel::unbounded();
        let reporter = ChunkReporter::new(tx, Arc::new(Metrics::new(Vec::new())));
        src.as_unit_chunker()
            .unwrap()
            .chunk_unit(&cx, &units.units[0].clone(), &reporter)
            .unwrap();
        drop(reporter);
        let chunks: Vec<Chunk> = rx.iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&*chunks[0].data, b"unit content");
    }
}
