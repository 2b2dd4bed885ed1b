//! Source adapters: chunk producers plugged into the pipeline's input.
//!
//! A source is initialized once, then asked to emit chunks through a
//! [`ChunkReporter`]. Sources own their access credentials and enumeration
//! strategy; the core only sees chunks with provenance. The optional
//! two-phase capability ([`UnitChunker`]) splits enumeration from chunking
//! so callers can checkpoint progress between units; the checkpoint string
//! is opaque to the core and persisted by the caller, never here.
//!
//! Per-chunk and per-unit failures are reported, counted, and skipped; they
//! never abort the run. Cancellation is not an error: a cancelled source
//! stops emitting and returns `Ok`.

pub mod filesystem;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::chunk::{Chunk, ChunkMetadata, DecoderTag, SourceType};
use crate::context::ScanContext;
use crate::engine::Metrics;
use crate::pool::PooledBytes;

pub use filesystem::FilesystemSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source init failed: {0}")]
    Init(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("chunk channel closed")]
    ChannelClosed,
}

/// Handed to a source so it can report chunks and per-item errors.
///
/// Errors reported through [`chunk_err`](Self::chunk_err) are logged and
/// counted; the source is expected to skip the item and continue.
pub struct ChunkReporter {
    tx: Sender<Chunk>,
    metrics: Arc<Metrics>,
    errors: Arc<AtomicU64>,
}

impl ChunkReporter {
    pub fn new(tx: Sender<Chunk>, metrics: Arc<Metrics>) -> Self {
        Self::with_error_counter(tx, metrics, Arc::new(AtomicU64::new(0)))
    }

    /// Reporter sharing an error counter with sibling reporters (one per
    /// producer thread).
    pub fn with_error_counter(
        tx: Sender<Chunk>,
        metrics: Arc<Metrics>,
        errors: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tx,
            metrics,
            errors,
        }
    }

    /// Sends a chunk downstream, blocking on a full channel (backpressure).
    pub fn chunk_ok(&self, chunk: Chunk) -> Result<(), SourceError> {
        self.tx.send(chunk).map_err(|_| SourceError::ChannelClosed)
    }

    /// Records a per-item failure; the scan continues.
    pub fn chunk_err(&self, err: &SourceError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %err, "source item skipped");
    }

    /// Counts a file discarded by the binary skip-list.
    pub fn note_file_skipped(&self) {
        self.metrics.add_file_skipped();
    }

    /// Counts an archive wall-clock budget trip.
    pub fn note_processing_timeout(&self) {
        self.metrics.add_processing_timeout();
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Chunk-producer capability.
pub trait Source: Send {
    /// One-time initialization. `config` is source-defined and opaque to
    /// the core.
    fn init(
        &mut self,
        name: &str,
        job_id: i64,
        source_id: i64,
        verify: bool,
        config: Option<&serde_json::Value>,
        concurrency: usize,
    ) -> Result<(), SourceError>;

    /// Emits all chunks through `reporter`. Returns when done, on fatal
    /// source error, or after observing cancellation.
    fn chunks(&mut self, cx: &ScanContext, reporter: &ChunkReporter) -> Result<(), SourceError>;

    fn source_type(&self) -> SourceType;
    fn source_id(&self) -> i64;
    fn job_id(&self) -> i64;

    /// Optional two-phase enumeration+chunking capability, probed at
    /// construction time.
    fn as_unit_chunker(&mut self) -> Option<&mut dyn UnitChunker> {
        None
    }
}

/// Opaque unit identity (also the resumable-progress checkpoint string).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitId(pub String);

/// Receives enumeration results.
pub trait UnitReporter {
    fn unit_ok(&mut self, unit: UnitId);
    fn unit_err(&mut self, err: SourceError);
}

/// Collecting reporter used by drivers and tests.
#[derive(Default)]
pub struct CollectUnits {
    pub units: Vec<UnitId>,
    pub errors: Vec<SourceError>,
}

impl UnitReporter for CollectUnits {
    fn unit_ok(&mut self, unit: UnitId) {
        self.units.push(unit);
    }

    fn unit_err(&mut self, err: SourceError) {
        self.errors.push(err);
    }
}

/// Two-phase enumeration and per-unit chunking.
pub trait UnitChunker {
    fn enumerate(
        &mut self,
        cx: &ScanContext,
        reporter: &mut dyn UnitReporter,
    ) -> Result<(), SourceError>;

    fn chunk_unit(
        &mut self,
        cx: &ScanContext,
        unit: &UnitId,
        reporter: &ChunkReporter,
    ) -> Result<(), SourceError>;
}

/// In-memory source for tests and embedders: one chunk per blob.
pub struct StaticSource {
    name: String,
    job_id: i64,
    source_id: i64,
    verify: bool,
    blobs: Vec<Vec<u8>>,
}

impl StaticSource {
    pub fn new(blobs: Vec<Vec<u8>>) -> Self {
        Self {
            name: String::new(),
            job_id: 0,
            source_id: 0,
            verify: false,
            blobs,
        }
    }
}

impl Source for StaticSource {
    fn init(
        &mut self,
        name: &str,
        job_id: i64,
        source_id: i64,
        verify: bool,
        _config: Option<&serde_json::Value>,
        _concurrency: usize,
    ) -> Result<(), SourceError> {
        self.name = name.to_string();
        self.job_id = job_id;
        self.source_id = source_id;
        self.verify = verify;
        Ok(())
    }

    fn chunks(&mut self, cx: &ScanContext, reporter: &ChunkReporter) -> Result<(), SourceError> {
        for blob in self.blobs.drain(..) {
            if cx.is_cancelled() {
                return Ok(());
            }
            reporter.chunk_ok(Chunk {
                source_type: SourceType::Static,
                source_name: self.name.clone(),
                source_id: self.source_id,
                job_id: self.job_id,
                data: PooledBytes::from(blob),
                metadata: ChunkMetadata::None,
                verify: self.verify,
                decoder_tag: DecoderTag::Plain,
            })?;
        }
        Ok(())
    }

    fn source_type(&self) -> SourceType {
        SourceType::Static
    }

    fn source_id(&self) -> i64 {
        self.source_id
    }

    fn job_id(&self) -> i64 {
        self.job_id
    }
}
