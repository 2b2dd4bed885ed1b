//! GitHub personal access token detector.
//!
//! Matches the prefixed fine/classic token forms and verifies against the
//! `/user` endpoint with the token as bearer credential.

use regex::bytes::Regex;

use crate::context::ScanContext;
use crate::detect::{Candidate, Detector, DetectorType};
use crate::verify::{status_outcome, StatusOutcome};

const DEFAULT_ENDPOINT: &str = "https://api.github.com/user";

pub struct GithubDetector {
    keywords: Vec<String>,
    pattern: Regex,
}

impl GithubDetector {
    pub fn new() -> Self {
        Self {
            keywords: ["ghp_", "gho_", "ghu_", "ghs_", "ghr_"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pattern: Regex::new(r"\b((?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{36})\b")
                .expect("github token pattern"),
        }
    }

    fn verify_token(&self, cx: &ScanContext, candidate: &mut Candidate, token: &str) {
        let Some(http) = cx.http.as_ref() else {
            return;
        };
        let endpoint = cx.endpoint_for("github").unwrap_or(DEFAULT_ENDPOINT);
        let resp = http
            .client()
            .get(endpoint)
            .header("Authorization", format!("token {token}"))
            .header("User-Agent", "credsweep")
            .send();
        match resp {
            Ok(resp) => match status_outcome(resp.status().as_u16()) {
                StatusOutcome::Verified => {
                    candidate.verified = true;
                    if let Ok(body) = resp.json::<serde_json::Value>() {
                        if let Some(login) = body.get("login").and_then(|v| v.as_str()) {
                            candidate
                                .extra_data
                                .insert("login".to_string(), login.to_string());
                        }
                    }
                }
                StatusOutcome::DeterminateNegative => {}
                StatusOutcome::Indeterminate => {
                    candidate.set_verification_error(
                        crate::detect::VerificationError::UnexpectedStatus(
                            resp.status().as_u16(),
                        ),
                    );
                }
            },
            Err(err) => candidate.set_verification_error(http.classify(&err)),
        }
    }
}

impl Default for GithubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for GithubDetector {
    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn from_data(&self, cx: &ScanContext, verify: bool, data: &[u8]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for caps in self.pattern.captures_iter(data) {
            let m = caps.get(1).expect("group 1 always present");
            let mut candidate = Candidate::new(self.key(), m.as_bytes().to_vec());
            candidate.extra_data.insert(
                "rotation_guide".to_string(),
                "https://howtorotate.com/docs/tutorials/github/".to_string(),
            );
            if verify {
                if let Ok(token) = std::str::from_utf8(m.as_bytes()) {
                    self.verify_token(cx, &mut candidate, token);
                }
            }
            out.push(candidate);
        }
        out
    }

    fn detector_type(&self) -> DetectorType {
        DetectorType::Github
    }

    fn description(&self) -> &str {
        "GitHub personal access token"
    }
}
