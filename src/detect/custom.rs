//! User-supplied regex detectors, declared in a YAML config file.
//!
//! Each declaration carries a name, prefilter keywords, a map of named
//! capture patterns (multiple names express a multi-part credential, e.g.
//! key + secret), and an optional list of verifier endpoints. Custom
//! detectors register their keywords in the prefilter exactly like built-in
//! ones; there is no special casing downstream.
//!
//! ```yaml
//! detectors:
//!   - name: hogtoken
//!     keywords: [hog]
//!     regex:
//!       token: "\\bhog_[a-z0-9]{32}\\b"
//!     verify:
//!       - endpoint: https://api.example.com/v1/me
//!         unsafe: false
//!         success_ranges: ["2xx"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use regex::bytes::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::context::ScanContext;
use crate::detect::{Candidate, Detector, DetectorType, VerificationError};

/// Cap on sid×key-style combinations emitted per chunk, so a pathological
/// chunk cannot explode the candidate set.
const MAX_COMBINATIONS: usize = 64;

#[derive(Clone, Debug, Deserialize)]
pub struct CustomDetectorsFile {
    pub detectors: Vec<CustomDetectorConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CustomDetectorConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Named capture patterns; multiple names form a multi-part credential.
    pub regex: BTreeMap<String, String>,
    #[serde(default)]
    pub verify: Vec<VerifierConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VerifierConfig {
    pub endpoint: String,
    /// Permit plain-http endpoints.
    #[serde(default, rename = "unsafe")]
    pub allow_http: bool,
    /// Status ranges counted as success: `"2xx"`, `"200"`, or `"200-204"`.
    #[serde(default)]
    pub success_ranges: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CustomDetectorError {
    #[error("custom detector has an empty name")]
    EmptyName,
    #[error("custom detector {0:?} declares no keywords")]
    NoKeywords(String),
    #[error("custom detector {0:?} declares no regex patterns")]
    NoPatterns(String),
    #[error("custom detector {name:?} pattern {pattern:?} failed to compile: {message}")]
    BadPattern {
        name: String,
        pattern: String,
        message: String,
    },
    #[error("custom detector {0:?} endpoint {1:?} is not https (set `unsafe` to allow)")]
    InsecureEndpoint(String, String),
    #[error("custom detector {0:?} has unparseable success range {1:?}")]
    BadRange(String, String),
}

#[derive(Debug, Error)]
pub enum CustomConfigError {
    #[error("failed to read custom detector config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse custom detector config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Detector(#[from] CustomDetectorError),
}

struct CompiledVerifier {
    endpoint: String,
    success: Vec<(u16, u16)>,
}

/// A compiled user-declared detector.
pub struct RegexDetector {
    name: String,
    keywords: Vec<String>,
    /// Sorted by part name; the first part is the primary `raw`.
    patterns: Vec<(String, Regex)>,
    verifiers: Vec<CompiledVerifier>,
}

impl RegexDetector {
    pub fn compile(cfg: &CustomDetectorConfig) -> Result<Self, CustomDetectorError> {
        if cfg.name.is_empty() {
            return Err(CustomDetectorError::EmptyName);
        }
        if cfg.keywords.iter().all(String::is_empty) {
            return Err(CustomDetectorError::NoKeywords(cfg.name.clone()));
        }
        if cfg.regex.is_empty() {
            return Err(CustomDetectorError::NoPatterns(cfg.name.clone()));
        }

        let mut patterns = Vec::with_capacity(cfg.regex.len());
        for (part, pattern) in &cfg.regex {
            let re = Regex::new(pattern).map_err(|e| CustomDetectorError::BadPattern {
                name: cfg.name.clone(),
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            patterns.push((part.clone(), re));
        }

        let mut verifiers = Vec::with_capacity(cfg.verify.len());
        for v in &cfg.verify {
            if !v.allow_http && !v.endpoint.starts_with("https://") {
                return Err(CustomDetectorError::InsecureEndpoint(
                    cfg.name.clone(),
                    v.endpoint.clone(),
                ));
            }
            let mut success = Vec::with_capacity(v.success_ranges.len());
            for r in &v.success_ranges {
                success.push(parse_status_range(r).ok_or_else(|| {
                    CustomDetectorError::BadRange(cfg.name.clone(), r.clone())
                })?);
            }
            if success.is_empty() {
                success.push((200, 299));
            }
            verifiers.push(CompiledVerifier {
                endpoint: v.endpoint.clone(),
                success,
            });
        }

        Ok(Self {
            name: cfg.name.clone(),
            keywords: cfg.keywords.iter().filter(|k| !k.is_empty()).cloned().collect(),
            patterns,
            verifiers,
        })
    }

    fn verify_parts(
        &self,
        cx: &ScanContext,
        candidate: &mut Candidate,
        parts: &[(&String, &[u8])],
    ) {
        let Some(http) = cx.http.as_ref() else {
            return;
        };
        for verifier in &self.verifiers {
            let endpoint = substitute_placeholders(&verifier.endpoint, parts);
            match http.client().get(&endpoint).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if verifier.success.iter().any(|&(lo, hi)| (lo..=hi).contains(&status)) {
                        candidate.verified = true;
                        candidate.verification_error = None;
                        return;
                    }
                    if status >= 500 {
                        candidate
                            .set_verification_error(VerificationError::UnexpectedStatus(status));
                    }
                    // Other non-success statuses: determinate negative for
                    // this verifier; try the next one.
                }
                Err(err) => candidate.set_verification_error(http.classify(&err)),
            }
        }
    }
}

impl Detector for RegexDetector {
    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn from_data(&self, cx: &ScanContext, verify: bool, data: &[u8]) -> Vec<Candidate> {
        // Every part must match at least once; a missing part means no
        // credential, complete or otherwise.
        let mut per_part: Vec<Vec<&[u8]>> = Vec::with_capacity(self.patterns.len());
        for (_, re) in &self.patterns {
            let matches: Vec<&[u8]> = re.find_iter(data).map(|m| m.as_bytes()).collect();
            if matches.is_empty() {
                return Vec::new();
            }
            per_part.push(matches);
        }

        let mut out = Vec::new();
        let mut indices = vec![0usize; per_part.len()];
        'combos: loop {
            let parts: Vec<(&String, &[u8])> = self
                .patterns
                .iter()
                .enumerate()
                .map(|(pi, (name, _))| (name, per_part[pi][indices[pi]]))
                .collect();

            let raw = parts[0].1.to_vec();
            let mut candidate = Candidate::new(self.key(), raw);
            if parts.len() > 1 {
                let mut composite = Vec::new();
                for (_, bytes) in &parts {
                    composite.extend_from_slice(bytes);
                }
                candidate.raw_v2 = Some(composite);
            }
            if verify {
                self.verify_parts(cx, &mut candidate, &parts);
            }
            out.push(candidate);
            if out.len() >= MAX_COMBINATIONS {
                break;
            }

            // Odometer increment over the per-part match lists.
            for slot in (0..indices.len()).rev() {
                indices[slot] += 1;
                if indices[slot] < per_part[slot].len() {
                    continue 'combos;
                }
                indices[slot] = 0;
            }
            break;
        }
        out
    }

    fn detector_type(&self) -> DetectorType {
        DetectorType::Custom(self.name.clone())
    }

    fn description(&self) -> &str {
        "user-declared regex detector"
    }
}

/// Replaces `{$part}` placeholders with the matched bytes (lossily UTF-8).
fn substitute_placeholders(endpoint: &str, parts: &[(&String, &[u8])]) -> String {
    let mut out = endpoint.to_string();
    for (name, bytes) in parts {
        let placeholder = format!("{{${name}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &String::from_utf8_lossy(bytes));
        }
    }
    out
}

/// Parses `"2xx"`, `"404"`, or `"200-204"` into an inclusive range.
fn parse_status_range(s: &str) -> Option<(u16, u16)> {
    let s = s.trim();
    if let Some(prefix) = s.strip_suffix("xx") {
        let hundreds: u16 = prefix.parse().ok()?;
        if !(1..=5).contains(&hundreds) {
            return None;
        }
        return Some((hundreds * 100, hundreds * 100 + 99));
    }
    if let Some((lo, hi)) = s.split_once('-') {
        let lo: u16 = lo.trim().parse().ok()?;
        let hi: u16 = hi.trim().parse().ok()?;
        if lo > hi {
            return None;
        }
        return Some((lo, hi));
    }
    let code: u16 = s.parse().ok()?;
    Some((code, code))
}

/// Parses a YAML document of custom detector declarations.
pub fn parse_custom_detectors(yaml: &str) -> Result<Vec<Arc<dyn Detector>>, CustomConfigError> {
    let file: CustomDetectorsFile = serde_yaml::from_str(yaml)?;
    let mut out: Vec<Arc<dyn Detector>> = Vec::with_capacity(file.detectors.len());
    for cfg in &file.detectors {
        out.push(Arc::new(RegexDetector::compile(cfg)?));
    }
    Ok(out)
}

/// Loads custom detector declarations from a file.
pub fn load_custom_detectors(path: &Path) -> Result<Vec<Arc<dyn Detector>>, CustomConfigError> {
    let yaml = std::fs::read_to_string(path)?;
    parse_custom_detectors(&yaml)
}
