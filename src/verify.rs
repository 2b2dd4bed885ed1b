//! Shared HTTP client for detector verification.
//!
//! Detectors implement their own HTTP calls; the core provides one client
//! with the required properties:
//! - bounded per-request timeout,
//! - no automatic redirection into loopback/private address space (opt-out
//!   via [`HttpConfig::allow_unsafe_redirects`] for tests),
//! - global redaction of configured secret-material substrings from anything
//!   that can reach log output.
//!
//! Retries are not performed here. Indeterminate transport errors are
//! classified into [`VerificationError`] values and surfaced so the caller
//! can decide whether to rerun.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect;
use thiserror::Error;

use crate::config::HttpConfig;
use crate::detect::VerificationError;

/// Startup-fatal failure while constructing the verification client.
#[derive(Debug, Error)]
#[error("failed to build verification http client: {0}")]
pub struct VerifierBuildError(#[from] reqwest::Error);

/// Determinate/indeterminate classification of an HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusOutcome {
    /// 2xx: the secret is confirmed.
    Verified,
    /// 401/403: determinate negative, no verification error.
    DeterminateNegative,
    /// Anything else (5xx and friends): indeterminate.
    Indeterminate,
}

/// Classifies an HTTP status per the verification error taxonomy.
pub fn status_outcome(status: u16) -> StatusOutcome {
    match status {
        200..=299 => StatusOutcome::Verified,
        401 | 403 => StatusOutcome::DeterminateNegative,
        _ => StatusOutcome::Indeterminate,
    }
}

/// Scrubs configured secret substrings from log-bound text.
#[derive(Clone, Debug, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new(secrets: Vec<String>) -> Self {
        Self {
            secrets: secrets.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn redact(&self, msg: &str) -> String {
        let mut out = msg.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), "[REDACTED]");
            }
        }
        out
    }
}

/// The shared verification client handed to detector workers.
pub struct HttpVerifier {
    client: Client,
    redactor: Redactor,
}

impl HttpVerifier {
    pub fn build(cfg: &HttpConfig) -> Result<Self, VerifierBuildError> {
        let policy = if cfg.allow_unsafe_redirects {
            redirect::Policy::limited(5)
        } else {
            redirect::Policy::custom(|attempt| {
                if attempt.previous().len() >= 5 {
                    return attempt.error("too many redirects");
                }
                if is_private_host(attempt.url().host_str()) {
                    return attempt.stop();
                }
                attempt.follow()
            })
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .redirect(policy)
            .build()?;
        Ok(Self {
            client,
            redactor: Redactor::new(cfg.redact.clone()),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Maps a transport-level error to the indeterminate taxonomy, with the
    /// message scrubbed of configured secret material.
    pub fn classify(&self, err: &reqwest::Error) -> VerificationError {
        if err.is_timeout() {
            return VerificationError::Timeout;
        }
        let msg = self.redactor.redact(&err.to_string());
        let lower = msg.to_ascii_lowercase();
        if lower.contains("tls") || lower.contains("certificate") {
            VerificationError::Tls(msg)
        } else {
            VerificationError::Network(msg)
        }
    }
}

/// True when a redirect target host is loopback, link-local, or private.
fn is_private_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        // No host at all: refuse rather than follow blindly.
        return true;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.is_unspecified() || is_v6_private(&v6)
        }
        // Hostnames other than localhost pass; DNS rebinding defenses are
        // out of scope for the core client.
        Err(_) => false,
    }
}

fn is_v6_private(v6: &Ipv6Addr) -> bool {
    let seg = v6.segments();
    // fc00::/7 unique-local, fe80::/10 link-local
    (seg[0] & 0xfe00) == 0xfc00 || (seg[0] & 0xffc0) == 0xfe80
}
