//! Finding sinks.
//!
//! The dispatcher runs on a single consumer thread (ordering guarantee) and
//! hands each admitted finding to the configured [`Sink`]. A sink is either
//! a formatter over a stream (JSONL, plain text) or a notifier pushing into
//! a user channel. Sink errors are logged by the dispatcher and only stop
//! the scan when configured fatal.

use std::io::{self, Write};

use crossbeam_channel::Sender;
use serde::Serialize;
use thiserror::Error;

use crate::chunk::{ChunkMetadata, DecoderTag, SourceType};
use crate::detect::{DetectorKey, VerificationError};
use crate::findings::{Finding, FindingCategory};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] io::Error),
    #[error("sink channel disconnected")]
    Disconnected,
}

pub trait Sink: Send {
    fn dispatch(&mut self, finding: &Finding) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Wire form of a finding, one JSON object per line.
#[derive(Serialize)]
struct FindingRecord<'a> {
    detector: &'a DetectorKey,
    category: FindingCategory,
    verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    verification_error: Option<&'a VerificationError>,
    redacted: &'a str,
    raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_v2: Option<String>,
    source_type: SourceType,
    source_name: &'a str,
    source_id: i64,
    job_id: i64,
    decoder: DecoderTag,
    line: u64,
    metadata: &'a ChunkMetadata,
    extra_data: &'a std::collections::BTreeMap<String, String>,
}

impl<'a> FindingRecord<'a> {
    fn new(finding: &'a Finding) -> Self {
        let c = &finding.candidate;
        Self {
            detector: &c.key,
            category: finding.category(),
            verified: c.verified,
            verification_error: c.verification_error.as_ref(),
            redacted: &c.redacted,
            raw: String::from_utf8_lossy(&c.raw).into_owned(),
            raw_v2: c
                .raw_v2
                .as_ref()
                .map(|r| String::from_utf8_lossy(r).into_owned()),
            source_type: finding.source_type,
            source_name: &finding.source_name,
            source_id: finding.source_id,
            job_id: finding.job_id,
            decoder: finding.decoder_tag,
            line: finding.line,
            metadata: &finding.metadata,
            extra_data: &c.extra_data,
        }
    }
}

/// JSONL formatter sink: one finding per line.
pub struct JsonlSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Sink for JsonlSink<W> {
    fn dispatch(&mut self, finding: &Finding) -> Result<(), SinkError> {
        let record = FindingRecord::new(finding);
        serde_json::to_writer(&mut self.out, &record).map_err(io::Error::from)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Human-readable formatter sink.
pub struct PlainSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> PlainSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Sink for PlainSink<W> {
    fn dispatch(&mut self, finding: &Finding) -> Result<(), SinkError> {
        let c = &finding.candidate;
        let category = match finding.category() {
            FindingCategory::Verified => "verified",
            FindingCategory::Unverified => "unverified",
            FindingCategory::Unknown => "unknown",
            FindingCategory::FilteredUnverified => "filtered",
        };
        let place = match &finding.metadata {
            ChunkMetadata::File { path, .. } => path.display().to_string(),
            ChunkMetadata::Archive { virtual_path, .. } => virtual_path.clone(),
            ChunkMetadata::None | ChunkMetadata::Custom(_) => finding.source_name.clone(),
        };
        writeln!(
            self.out,
            "{category:<10} {key} {place}:{line} {redacted} [{decoder}]",
            key = c.key,
            line = finding.line + 1,
            redacted = c.redacted,
            decoder = finding.decoder_tag.as_str(),
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Notifier sink: pushes findings into a user channel.
pub struct ChannelSink {
    tx: Sender<Finding>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Finding>) -> Self {
        Self { tx }
    }
}

impl Sink for ChannelSink {
    fn dispatch(&mut self, finding: &Finding) -> Result<(), SinkError> {
        self.tx
            .send(finding.clone())
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Test/bench sink that drops everything.
pub struct NullSink;

impl Sink for NullSink {
    fn dispatch(&mut self, _finding: &Finding) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::test_chunk;
    use crate::detect::{Candidate, DetectorType};

    fn finding() -> Finding {
        let chunk = test_chunk(b"line one\nkey AKIA1234 here\n");
        let key = DetectorKey {
            detector_type: DetectorType::Aws,
            version: 1,
        };
        Finding::from_candidate(Candidate::new(key, b"AKIA1234".to_vec()), &chunk)
    }

    #[test]
    fn jsonl_sink_emits_one_line_per_finding() {
        let mut sink = JsonlSink::new(Vec::new());
        sink.dispatch(&finding()).unwrap();
        sink.dispatch(&finding()).unwrap();
        let out = sink.into_inner();
        let lines: Vec<&[u8]> = out.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_slice(lines[0]).unwrap();
        assert_eq!(parsed["category"], "unverified");
        assert_eq!(parsed["raw"], "AKIA1234");
        assert_eq!(parsed["line"], 1);
        assert_eq!(parsed["detector"]["version"], 1);
        assert!(parsed.get("verification_error").is_none());
    }

    #[test]
    fn plain_sink_formats_category_and_location() {
        let mut sink = PlainSink::new(Vec::new());
        sink.dispatch(&finding()).unwrap();
        let out = String::from_utf8(sink.out).unwrap();
        assert!(out.starts_with("unverified"));
        assert!(out.contains("aws.v1"));
        assert!(out.contains(":2 "), "1-based line: {out}");
    }

    #[test]
    fn channel_sink_reports_disconnect() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.dispatch(&finding()).unwrap();
        assert_eq!(rx.try_recv().unwrap().candidate.raw, b"AKIA1234");
        drop(rx);
        assert!(matches!(
            sink.dispatch(&finding()),
            Err(SinkError::Disconnected)
        ));
    }
}
