//! Cancellation token and per-scan context threaded through every stage.
//!
//! # Invariants
//! - Cancellation is sticky: once set it is never cleared.
//! - Every suspension point (channel op, HTTP call, file read, archive walk)
//!   checks the token and unwinds cleanly when it is set. Cancellation is not
//!   an error; stages finish their in-flight item and exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;

use crate::verify::HttpVerifier;

/// Grace period allowed for stages to drain after cancellation before the
/// caller may forcibly terminate.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Cooperative cancellation flag shared by all pipeline stages.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Carrier handed to sources, detectors, and archive handlers.
///
/// Bundles the cancellation token with the shared HTTP verifier and the
/// per-detector endpoint override map so no stage reaches for process-global
/// state.
#[derive(Clone)]
pub struct ScanContext {
    pub token: CancellationToken,
    /// Shared verification client; `None` when verification is disabled.
    pub http: Option<Arc<HttpVerifier>>,
    /// Custom verification endpoints keyed by detector name. Consulted by
    /// detectors that support endpoint redirection; absent keys mean the
    /// detector's built-in endpoint.
    pub endpoints: Arc<AHashMap<String, String>>,
}

impl ScanContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            http: None,
            endpoints: Arc::new(AHashMap::new()),
        }
    }

    pub fn with_http(mut self, http: Arc<HttpVerifier>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_endpoints(mut self, endpoints: AHashMap<String, String>) -> Self {
        self.endpoints = Arc::new(endpoints);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Endpoint override for a detector, if configured.
    pub fn endpoint_for(&self, detector: &str) -> Option<&str> {
        self.endpoints.get(detector).map(String::as_str)
    }
}
