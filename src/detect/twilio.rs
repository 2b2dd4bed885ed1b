//! Twilio account SID + API key detector.
//!
//! A multi-part credential: the account SID (`AC` + 32 hex) and a 32-hex key
//! are only useful together, so `raw_v2` carries the composite `sid ‖ key`
//! and verification probes the Services endpoint with the pair as basic-auth
//! credentials.

use regex::bytes::Regex;
use serde::Deserialize;

use crate::context::ScanContext;
use crate::detect::{Candidate, Detector, DetectorType, VerificationError};
use crate::verify::{status_outcome, StatusOutcome};

const DEFAULT_ENDPOINT: &str = "https://verify.twilio.com/v2/Services";

pub struct TwilioDetector {
    keywords: Vec<String>,
    /// Cheap context gate: a SID within 20 bytes of the literal "sid".
    identifier: Regex,
    sid: Regex,
    key_pat: Regex,
}

#[derive(Deserialize)]
struct ServiceListResponse {
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Deserialize)]
struct ServiceEntry {
    #[serde(default)]
    friendly_name: String,
    #[serde(default)]
    account_sid: String,
}

impl TwilioDetector {
    pub fn new() -> Self {
        Self {
            keywords: vec!["sid".to_string()],
            identifier: Regex::new(r"(?i)sid.{0,20}AC[0-9a-f]{32}").expect("twilio id pattern"),
            sid: Regex::new(r"\bAC[0-9a-f]{32}\b").expect("twilio sid pattern"),
            key_pat: Regex::new(r"\b[0-9a-f]{32}\b").expect("twilio key pattern"),
        }
    }

    fn verify_pair(&self, cx: &ScanContext, candidate: &mut Candidate, sid: &str, key: &str) {
        let Some(http) = cx.http.as_ref() else {
            return;
        };
        let endpoint = cx.endpoint_for("twilio").unwrap_or(DEFAULT_ENDPOINT);
        let resp = http
            .client()
            .get(endpoint)
            .basic_auth(sid, Some(key))
            .header("Accept", "*/*")
            .send();
        match resp {
            Ok(resp) => match status_outcome(resp.status().as_u16()) {
                StatusOutcome::Verified => {
                    candidate.verified = true;
                    if let Ok(body) = resp.json::<ServiceListResponse>() {
                        if let Some(service) = body.services.first() {
                            candidate.extra_data.insert(
                                "friendly_name".to_string(),
                                service.friendly_name.clone(),
                            );
                            candidate
                                .extra_data
                                .insert("account_sid".to_string(), service.account_sid.clone());
                        }
                    }
                }
                StatusOutcome::DeterminateNegative => {}
                StatusOutcome::Indeterminate => candidate.set_verification_error(
                    VerificationError::UnexpectedStatus(resp.status().as_u16()),
                ),
            },
            Err(err) => candidate.set_verification_error(http.classify(&err)),
        }
    }
}

impl Default for TwilioDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for TwilioDetector {
    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn from_data(&self, cx: &ScanContext, verify: bool, data: &[u8]) -> Vec<Candidate> {
        if !self.identifier.is_match(data) {
            return Vec::new();
        }

        let sids: Vec<&[u8]> = self.sid.find_iter(data).map(|m| m.as_bytes()).collect();
        let keys: Vec<&[u8]> = self.key_pat.find_iter(data).map(|m| m.as_bytes()).collect();

        let mut out = Vec::new();
        for &sid in &sids {
            for &key in &keys {
                let mut composite = Vec::with_capacity(sid.len() + key.len());
                composite.extend_from_slice(sid);
                composite.extend_from_slice(key);

                let mut candidate = Candidate::new(self.key(), sid.to_vec());
                candidate.raw_v2 = Some(composite);
                candidate.redacted = String::from_utf8_lossy(sid).into_owned();
                candidate.extra_data.insert(
                    "rotation_guide".to_string(),
                    "https://howtorotate.com/docs/tutorials/twilio/".to_string(),
                );

                if verify {
                    if let (Ok(sid_str), Ok(key_str)) =
                        (std::str::from_utf8(sid), std::str::from_utf8(key))
                    {
                        self.verify_pair(cx, &mut candidate, sid_str, key_str);
                    }
                }

                out.push(candidate);
            }
        }
        out
    }

    fn detector_type(&self) -> DetectorType {
        DetectorType::Twilio
    }

    fn description(&self) -> &str {
        "Twilio account SID and API key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CancellationToken, ScanContext};

    fn cx() -> ScanContext {
        ScanContext::new(CancellationToken::new())
    }

    const SID: &str = "AC0123456789abcdef0123456789abcdef";
    const KEY: &str = "fedcba9876543210fedcba9876543210";

    #[test]
    fn pairs_sid_with_key() {
        let d = TwilioDetector::new();
        let data = format!("account_sid = {SID}\nauth = {KEY}\n");
        let found = d.from_data(&cx(), false, data.as_bytes());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].raw, SID.as_bytes());
        let composite = found[0].raw_v2.as_ref().unwrap();
        assert_eq!(composite.len(), SID.len() + KEY.len());
        assert_eq!(found[0].redacted, SID);
    }

    #[test]
    fn requires_sid_context() {
        let d = TwilioDetector::new();
        // SID-shaped token present but no "sid" marker nearby.
        let data = format!("xx = {SID}\nyy = {KEY}\n");
        assert!(d.from_data(&cx(), false, data.as_bytes()).is_empty());
    }
}
