use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::PortraitError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub generated: u64,
    pub rate_limited: u64,
    pub content_rejected: u64,
    pub upstream_errors: u64,
    pub internal_errors: u64,
    pub downloads: u64,
    pub download_misses: u64,
    pub artifacts_available: u64,
    pub artifacts_expired: u64,
    pub pending_expiries: u64,
    pub tracked_clients: u64,
}

/// Counters shared by every request task.
#[derive(Debug, Default)]
pub struct Observability {
    requests: AtomicU64,
    generated: AtomicU64,
    rate_limited: AtomicU64,
    content_rejected: AtomicU64,
    upstream_errors: AtomicU64,
    internal_errors: AtomicU64,
    downloads: AtomicU64,
    download_misses: AtomicU64,
}

impl Observability {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generated(&self) {
        self.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &PortraitError) {
        let counter = match err {
            PortraitError::RateLimited => &self.rate_limited,
            PortraitError::ContentRejected { .. } => &self.content_rejected,
            PortraitError::Upstream { .. } | PortraitError::MalformedUpstreamResponse { .. } => {
                &self.upstream_errors
            }
            PortraitError::Internal(_) | PortraitError::Config(_) => &self.internal_errors,
            PortraitError::InvalidRequest { .. } | PortraitError::ArtifactNotFound => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download(&self, hit: bool) {
        if hit {
            self.downloads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.download_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counter values only; gauges owned by other components are left at zero.
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            content_rejected: self.content_rejected.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            download_misses: self.download_misses.load(Ordering::Relaxed),
            ..ObservabilitySnapshot::default()
        }
    }
}
