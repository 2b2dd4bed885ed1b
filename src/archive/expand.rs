//! Recursive container expansion.
//!
//! Walks a container, emitting each contained file as an [`ArchiveEntry`]
//! tagged with a virtual path (`outer.zip!dir/file`) and its nesting depth.
//! Entries that are themselves containers are opened in place, subject to
//! the depth, wall-clock, and per-file budgets; gzip counts as a compression
//! wrapper, not a nesting level, so `.tar.gz` chains cost one level.
//!
//! Third-party decompressors are treated as untrusted: the whole walk runs
//! inside a recovery boundary, and a panic surfaces as a
//! [`ProcessingWarning::HandlerPanic`] with the container abandoned and the
//! pipeline intact.

use std::fmt;
use std::io::{Cursor, Read, Seek};
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};

use flate2::read::GzDecoder;

use crate::context::ScanContext;
use crate::reader::SkipList;

use super::budget::ArchiveBudget;
use super::detect::{detect_kind_from_name_bytes, sniff_archive, ArchiveKind, UnsupportedKind};
use super::ArchiveConfig;

/// One contained file, ready to become a chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// `outer.zip!inner.tar!path/in/tar` style provenance path.
    pub virtual_path: String,
    /// Nesting depth of the entry (1 = direct child of the root container).
    pub depth: u8,
    pub data: Vec<u8>,
}

/// Finding-adjacent event recorded while expanding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessingWarning {
    DepthClipped { virtual_path: String },
    EntryTruncated { virtual_path: String },
    TimeBudgetExceeded { virtual_path: String },
    Unsupported { virtual_path: String, kind: UnsupportedKind },
    HandlerPanic { virtual_path: String, message: String },
    ReadError { virtual_path: String, message: String },
}

impl fmt::Display for ProcessingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingWarning::DepthClipped { virtual_path } => {
                write!(f, "nested archive depth limit reached at {virtual_path}")
            }
            ProcessingWarning::EntryTruncated { virtual_path } => {
                write!(f, "entry truncated at size budget: {virtual_path}")
            }
            ProcessingWarning::TimeBudgetExceeded { virtual_path } => {
                write!(f, "archive time budget exceeded in {virtual_path}")
            }
            ProcessingWarning::Unsupported { virtual_path, kind } => {
                write!(f, "unsupported container format {} at {virtual_path}", kind.as_str())
            }
            ProcessingWarning::HandlerPanic { virtual_path, message } => {
                write!(f, "archive handler panicked at {virtual_path}: {message}")
            }
            ProcessingWarning::ReadError { virtual_path, message } => {
                write!(f, "read error at {virtual_path}: {message}")
            }
        }
    }
}

/// Result of expanding one root container.
#[derive(Clone, Debug, Default)]
pub struct ExpandReport {
    pub entries_emitted: u32,
    pub entries_skipped_binary: u32,
    pub warnings: Vec<ProcessingWarning>,
    /// The wall-clock budget ran out; emitted entries are a partial result.
    pub timed_out: bool,
}

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

struct Expander<'a> {
    cx: &'a ScanContext,
    budget: ArchiveBudget,
    skip: &'a SkipList,
    report: ExpandReport,
    emit: &'a mut dyn FnMut(ArchiveEntry) -> ControlFlow<()>,
}

/// Expands one root container, emitting entries through `emit`.
///
/// `emit` returning `Break` stops the walk (used for cancellation and
/// channel shutdown); partial results already emitted stand.
pub fn expand_archive(
    cx: &ScanContext,
    cfg: &ArchiveConfig,
    skip: &SkipList,
    kind: ArchiveKind,
    mut reader: impl Read + Seek,
    root_name: &str,
    emit: &mut dyn FnMut(ArchiveEntry) -> ControlFlow<()>,
) -> ExpandReport {
    let mut st = Expander {
        cx,
        budget: ArchiveBudget::start(cfg),
        skip,
        report: ExpandReport::default(),
        emit,
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        st.walk(kind, &mut reader, root_name, 0);
    }));
    if let Err(panic) = outcome {
        st.report.warnings.push(ProcessingWarning::HandlerPanic {
            virtual_path: root_name.to_string(),
            message: panic_message(panic.as_ref()),
        });
    }
    st.report
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Expander<'_> {
    fn walk(
        &mut self,
        kind: ArchiveKind,
        rdr: &mut dyn ReadSeek,
        vpath: &str,
        depth: u8,
    ) -> ControlFlow<()> {
        if self.cx.is_cancelled() {
            return ControlFlow::Break(());
        }
        if self.budget.check_depth(depth).is_err() {
            self.report.warnings.push(ProcessingWarning::DepthClipped {
                virtual_path: vpath.to_string(),
            });
            return ControlFlow::Continue(());
        }
        if self.out_of_time(vpath) {
            return ControlFlow::Break(());
        }
        match kind {
            ArchiveKind::Gzip => self.walk_gzip(rdr, vpath, depth, false),
            ArchiveKind::TarGz => self.walk_gzip(rdr, vpath, depth, true),
            ArchiveKind::Tar => self.walk_tar(rdr, vpath, depth),
            ArchiveKind::Zip => self.walk_zip(rdr, vpath, depth),
        }
    }

    fn walk_gzip(
        &mut self,
        rdr: &mut dyn ReadSeek,
        vpath: &str,
        depth: u8,
        force_tar: bool,
    ) -> ControlFlow<()> {
        let mut dec = GzDecoder::new(rdr);
        let (data, truncated) = match read_bounded(&mut dec, self.budget.max_entry_bytes()) {
            Ok(r) => r,
            Err(e) => {
                self.report.warnings.push(ProcessingWarning::ReadError {
                    virtual_path: vpath.to_string(),
                    message: e.to_string(),
                });
                return ControlFlow::Continue(());
            }
        };
        let inner = gzip_inner_name(vpath);
        if truncated {
            self.report.warnings.push(ProcessingWarning::EntryTruncated {
                virtual_path: inner.clone(),
            });
        }
        if force_tar {
            let mut cursor = Cursor::new(data);
            // Named chain kind: the gzip wrapper does not consume a nesting
            // level, the tar inside is walked at the same depth.
            return self.walk(ArchiveKind::Tar, &mut cursor, vpath, depth);
        }
        self.handle_payload(data, inner, depth + 1)
    }

    fn walk_tar(
        &mut self,
        rdr: &mut dyn ReadSeek,
        vpath: &str,
        depth: u8,
    ) -> ControlFlow<()> {
        let mut archive = tar::Archive::new(rdr);
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(e) => {
                self.report.warnings.push(ProcessingWarning::ReadError {
                    virtual_path: vpath.to_string(),
                    message: e.to_string(),
                });
                return ControlFlow::Continue(());
            }
        };
        for entry in entries {
            if self.cx.is_cancelled() || self.out_of_time(vpath) {
                return ControlFlow::Break(());
            }
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.report.warnings.push(ProcessingWarning::ReadError {
                        virtual_path: vpath.to_string(),
                        message: e.to_string(),
                    });
                    // A corrupt header makes the rest of the stream
                    // unreliable; abandon this container.
                    return ControlFlow::Continue(());
                }
            };
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let child_vpath = format!("{vpath}!{name}");
            let (data, truncated) =
                match read_bounded(&mut entry, self.budget.max_entry_bytes()) {
                    Ok(r) => r,
                    Err(e) => {
                        self.report.warnings.push(ProcessingWarning::ReadError {
                            virtual_path: child_vpath,
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
            if truncated {
                self.report.warnings.push(ProcessingWarning::EntryTruncated {
                    virtual_path: child_vpath.clone(),
                });
            }
            self.handle_payload(data, child_vpath, depth + 1)?;
        }
        ControlFlow::Continue(())
    }

    fn walk_zip(
        &mut self,
        rdr: &mut dyn ReadSeek,
        vpath: &str,
        depth: u8,
    ) -> ControlFlow<()> {
        let mut zip = match zip::ZipArchive::new(rdr) {
            Ok(zip) => zip,
            Err(e) => {
                self.report.warnings.push(ProcessingWarning::ReadError {
                    virtual_path: vpath.to_string(),
                    message: e.to_string(),
                });
                return ControlFlow::Continue(());
            }
        };
        for i in 0..zip.len() {
            if self.cx.is_cancelled() || self.out_of_time(vpath) {
                return ControlFlow::Break(());
            }
            let mut file = match zip.by_index(i) {
                Ok(file) => file,
                Err(e) => {
                    self.report.warnings.push(ProcessingWarning::ReadError {
                        virtual_path: vpath.to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if file.is_dir() {
                continue;
            }
            let child_vpath = format!("{vpath}!{}", file.name());
            let (data, truncated) =
                match read_bounded(&mut file, self.budget.max_entry_bytes()) {
                    Ok(r) => r,
                    Err(e) => {
                        self.report.warnings.push(ProcessingWarning::ReadError {
                            virtual_path: child_vpath,
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
            if truncated {
                self.report.warnings.push(ProcessingWarning::EntryTruncated {
                    virtual_path: child_vpath.clone(),
                });
            }
            drop(file);
            self.handle_payload(data, child_vpath, depth + 1)?;
        }
        ControlFlow::Continue(())
    }

    /// Routes an extracted payload: recurse into nested containers, drop
    /// skip-listed binaries, emit everything else.
    fn handle_payload(
        &mut self,
        data: Vec<u8>,
        vpath: String,
        container_depth: u8,
    ) -> ControlFlow<()> {
        if data.is_empty() {
            return ControlFlow::Continue(());
        }
        let head = &data[..data.len().min(512)];
        let nested = match sniff_archive(head) {
            Some(found) => Some(found),
            None => detect_kind_from_name_bytes(vpath.as_bytes()).map(Ok),
        };
        match nested {
            Some(Ok(kind)) => {
                if self.budget.check_depth(container_depth).is_ok() {
                    let mut cursor = Cursor::new(data);
                    return self.walk(kind, &mut cursor, &vpath, container_depth);
                }
                self.report.warnings.push(ProcessingWarning::DepthClipped {
                    virtual_path: vpath.clone(),
                });
                // Clipped: fall through and scan the container bytes as-is.
            }
            Some(Err(kind)) => {
                self.report.warnings.push(ProcessingWarning::Unsupported {
                    virtual_path: vpath.clone(),
                    kind,
                });
            }
            None => {}
        }
        if self.skip.matches(head).is_some() {
            self.report.entries_skipped_binary += 1;
            return ControlFlow::Continue(());
        }
        self.report.entries_emitted += 1;
        (self.emit)(ArchiveEntry {
            virtual_path: vpath,
            depth: container_depth,
            data,
        })
    }

    /// Deadline check that records the first trip.
    fn out_of_time(&mut self, vpath: &str) -> bool {
        if self.budget.check_deadline().is_ok() {
            return false;
        }
        if !self.report.timed_out {
            self.report.timed_out = true;
            self.report
                .warnings
                .push(ProcessingWarning::TimeBudgetExceeded {
                    virtual_path: vpath.to_string(),
                });
        }
        true
    }
}

/// Reads at most `cap` bytes; the bool reports whether input was truncated.
fn read_bounded(r: &mut dyn Read, cap: u64) -> std::io::Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut limited = r.take(cap + 1);
    limited.read_to_end(&mut out)?;
    if out.len() as u64 > cap {
        out.truncate(cap as usize);
        return Ok((out, true));
    }
    Ok((out, false))
}

/// `data.tar.gz` → `data.tar`, `x.tgz` → `x.tar`, `y.gz` → `y`.
fn gzip_inner_name(vpath: &str) -> String {
    let lower = vpath.to_ascii_lowercase();
    if let Some(stem) = lower
        .strip_suffix(".tgz")
        .map(|_| &vpath[..vpath.len() - 4])
    {
        return format!("{stem}.tar");
    }
    if lower.ends_with(".gz") {
        return vpath[..vpath.len() - 3].to_string();
    }
    format!("{vpath}!gunzip")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn cx() -> ScanContext {
        ScanContext::new(CancellationToken::new())
    }

    fn gzip_bytes(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn collect(
        cfg: &ArchiveConfig,
        kind: ArchiveKind,
        bytes: Vec<u8>,
        root: &str,
    ) -> (Vec<ArchiveEntry>, ExpandReport) {
        let mut entries = Vec::new();
        let report = expand_archive(
            &cx(),
            cfg,
            &SkipList::default(),
            kind,
            Cursor::new(bytes),
            root,
            &mut |entry| {
                entries.push(entry);
                ControlFlow::Continue(())
            },
        );
        (entries, report)
    }

    #[test]
    fn targz_with_two_files_emits_two_entries() {
        let tar = tar_bytes(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let targz = gzip_bytes(&tar);
        let cfg = ArchiveConfig::default();
        let (entries, report) = collect(&cfg, ArchiveKind::TarGz, targz, "bundle.tar.gz");
        assert_eq!(report.entries_emitted, 2);
        assert_eq!(entries[0].virtual_path, "bundle.tar.gz!a.txt");
        assert_eq!(entries[0].data, b"alpha");
        assert_eq!(entries[0].depth, 1);
        assert_eq!(entries[1].virtual_path, "bundle.tar.gz!b.txt");
        assert!(report.warnings.is_empty());
        assert!(!report.timed_out);
    }

    #[test]
    fn nested_zip_in_tar_recurses_with_depth() {
        let inner_zip = zip_bytes(&[("secret.txt", b"inner payload")]);
        let tar = tar_bytes(&[("nested.zip", &inner_zip)]);
        let cfg = ArchiveConfig::default();
        let (entries, report) = collect(&cfg, ArchiveKind::Tar, tar, "outer.tar");
        assert_eq!(report.entries_emitted, 1);
        assert_eq!(entries[0].virtual_path, "outer.tar!nested.zip!secret.txt");
        assert_eq!(entries[0].depth, 2);
        assert_eq!(entries[0].data, b"inner payload");
    }

    #[test]
    fn depth_at_limit_proceeds_one_past_is_clipped() {
        // zip(zip(payload)): depths 0 and 1.
        let level2 = zip_bytes(&[("deep.txt", b"deep payload")]);
        let level1 = zip_bytes(&[("l2.zip", &level2)]);

        let ok_cfg = ArchiveConfig {
            max_depth: 2,
            ..ArchiveConfig::default()
        };
        let (entries, report) = collect(&ok_cfg, ArchiveKind::Zip, level1.clone(), "l1.zip");
        assert_eq!(report.entries_emitted, 1, "depth at limit proceeds");
        assert_eq!(entries[0].virtual_path, "l1.zip!l2.zip!deep.txt");

        let clip_cfg = ArchiveConfig {
            max_depth: 1,
            ..ArchiveConfig::default()
        };
        let (entries, report) = collect(&clip_cfg, ArchiveKind::Zip, level1, "l1.zip");
        // The nested container is clipped and scanned as opaque bytes.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].virtual_path, "l1.zip!l2.zip");
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ProcessingWarning::DepthClipped { .. })));
    }

    #[test]
    fn entry_size_budget_truncates_with_warning() {
        let big = vec![b'x'; 100];
        let tar = tar_bytes(&[("big.txt", &big)]);
        let cfg = ArchiveConfig {
            max_entry_bytes: 10,
            ..ArchiveConfig::default()
        };
        let (entries, report) = collect(&cfg, ArchiveKind::Tar, tar, "t.tar");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data.len(), 10);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ProcessingWarning::EntryTruncated { .. })));
    }

    #[test]
    fn binary_entries_are_skipped_and_counted() {
        let png = [0x89, b'P', b'N', b'G', 0, 0, 0, 0];
        let tar = tar_bytes(&[("img.png", &png), ("notes.txt", b"text")]);
        let cfg = ArchiveConfig::default();
        let (entries, report) = collect(&cfg, ArchiveKind::Tar, tar, "t.tar");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].virtual_path, "t.tar!notes.txt");
        assert_eq!(report.entries_skipped_binary, 1);
    }

    #[test]
    fn garbage_container_warns_instead_of_failing() {
        let cfg = ArchiveConfig::default();
        let (entries, report) =
            collect(&cfg, ArchiveKind::Zip, b"not actually a zip".to_vec(), "bad.zip");
        assert!(entries.is_empty());
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ProcessingWarning::ReadError { .. })));
    }

    #[test]
    fn expired_time_budget_yields_partial_result_with_warning() {
        use crate::archive::ArchiveBudget;

        let tar = tar_bytes(&[("a.txt", b"first"), ("b.txt", b"second")]);
        let cfg = ArchiveConfig::default();
        let cx = cx();
        let mut budget = ArchiveBudget::start(&cfg);
        budget.force_expire();

        let mut entries = Vec::new();
        let mut emit = |entry: ArchiveEntry| {
            entries.push(entry);
            ControlFlow::Continue(())
        };
        let mut st = Expander {
            cx: &cx,
            budget,
            skip: &SkipList::default(),
            report: ExpandReport::default(),
            emit: &mut emit,
        };
        let _ = st.walk(ArchiveKind::Tar, &mut Cursor::new(tar), "t.tar", 0);
        let report = st.report;

        assert!(report.timed_out);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ProcessingWarning::TimeBudgetExceeded { .. })));
        // Whatever was extracted before the trip stands; here the trip is
        // immediate, so nothing was.
        assert!(entries.is_empty());
    }

    #[test]
    fn gzip_inner_names() {
        assert_eq!(gzip_inner_name("data.gz"), "data");
        assert_eq!(gzip_inner_name("x.tgz"), "x.tar");
        assert_eq!(gzip_inner_name("weird"), "weird!gunzip");
    }
}
