//! Credential-discovery engine.
//!
//! Ingests raw byte streams from heterogeneous sources and emits findings:
//! substrings that look like, and when possible demonstrably are, secrets.
//!
//! Pipeline flow (one chunk):
//! 1) A source emits a provenance-tagged [`chunk::Chunk`].
//! 2) The decoder stack fans it out into decoded variants (base64, UTF-16,
//!    escaped unicode, HTML entities) alongside the plain bytes.
//! 3) The keyword prefilter (one case-insensitive Aho-Corasick pass) selects
//!    the detectors whose keywords appear in each variant.
//! 4) Detector workers run the admitted detectors, verify candidates against
//!    remote endpoints under a concurrency budget, resolve version overlaps,
//!    and gate unverified noise by entropy and repetition.
//! 5) The per-chunk deduplicator collapses the same secret surfaced via
//!    different decodings; a single dispatcher thread hands surviving
//!    findings to the sink in completion order.
//!
//! Side channels: a threshold-spilling reader substrate backs file-shaped
//! sources and recurses into nested archives; atomic metrics are exported by
//! snapshot read.
//!
//! Everything is bounded: channels, worker pools, archive expansion, decode
//! output. Cancellation is cooperative and unwinds cleanly.

pub mod archive;
pub mod chunk;
pub mod config;
pub mod context;
pub mod decode;
pub mod detect;
pub mod engine;
pub mod findings;
pub mod pool;
pub mod prefilter;
pub mod reader;
pub mod sources;
pub mod verify;

pub use chunk::{Chunk, ChunkMetadata, DecoderTag, SourceType};
pub use config::{DetectorOverrides, EngineConfig, ResultsFilter};
pub use context::{CancellationToken, ScanContext};
pub use detect::{default_detectors, Candidate, Detector, DetectorKey, DetectorType};
pub use engine::{Engine, EngineError, Metrics, MetricsSnapshot, ScanReport, Sink};
pub use findings::{Finding, FindingCategory};
pub use sources::{FilesystemSource, Source};

/// Exit code for "findings present and `--fail` requested". CI users depend
/// on this exact value.
pub const EXIT_FINDINGS: i32 = 183;

/// Exit code for an internal error.
pub const EXIT_ERROR: i32 = 1;
