//! Request flow: admission, style resolution, upstream generation, storage, expiry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::artifact::{Artifact, ArtifactId, ArtifactStore};
use crate::observability::{Observability, ObservabilitySnapshot};
use crate::providers::{ImageGenerator, SourceImage};
use crate::quota::{QuotaConfig, QuotaTracker};
use crate::scheduler::{DEFAULT_RETENTION, ExpiryScheduler};
use crate::style::Style;
use crate::{PortraitError, Result};

#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub image: SourceImage,
    pub style_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadHandle {
    pub id: ArtifactId,
    pub expires_in: Duration,
}

impl DownloadHandle {
    pub fn download_url(&self) -> String {
        format!("/download/{}", self.id)
    }
}

pub struct Studio {
    generator: Arc<dyn ImageGenerator>,
    artifacts: Arc<ArtifactStore>,
    expiry: ExpiryScheduler,
    quota: QuotaTracker,
    retention: Duration,
    observability: Observability,
}

impl Studio {
    /// Must be called inside a tokio runtime: the expiry worker is spawned here.
    pub fn new(generator: Arc<dyn ImageGenerator>, artifacts: Arc<ArtifactStore>) -> Self {
        let expiry = ExpiryScheduler::spawn(artifacts.clone());
        Self {
            generator,
            artifacts,
            expiry,
            quota: QuotaTracker::new(QuotaConfig::default()),
            retention: DEFAULT_RETENTION,
            observability: Observability::default(),
        }
    }

    pub fn with_quota(mut self, quota: QuotaTracker) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Runs one generation. Every failure, including a panic below this call,
    /// comes back as a `PortraitError`.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        client_key: &str,
    ) -> Result<DownloadHandle> {
        self.observability.record_request();

        let result = AssertUnwindSafe(self.run(request, client_key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(PortraitError::Internal(format!(
                    "generation panicked: {detail}"
                )))
            });

        match &result {
            Ok(handle) => {
                self.observability.record_generated();
                tracing::info!(
                    client = client_key,
                    artifact_id = %handle.id,
                    expires_in_secs = handle.expires_in.as_secs(),
                    "portrait generated"
                );
            }
            Err(err) => {
                self.observability.record_failure(err);
                match err {
                    PortraitError::Internal(_) | PortraitError::Config(_) => {
                        tracing::error!(client = client_key, error = %err, "generation failed")
                    }
                    _ => tracing::info!(
                        client = client_key,
                        kind = err.kind(),
                        error = %err,
                        "generation rejected"
                    ),
                }
            }
        }
        result
    }

    async fn run(&self, request: GenerationRequest, client_key: &str) -> Result<DownloadHandle> {
        if !self.quota.admit(client_key) {
            return Err(PortraitError::RateLimited);
        }

        if request.image.bytes.is_empty() {
            return Err(PortraitError::invalid_request("Uploaded image is empty."));
        }

        let style = Style::resolve(&request.style_key);

        let generated = self
            .generator
            .generate(&request.image, style.instruction())
            .await?;

        let size = generated.bytes.len();
        let id = self
            .artifacts
            .put(generated.bytes, &generated.content_type)
            .await?;
        tracing::debug!(artifact_id = %id, size, style = %style, "artifact stored");

        if let Err(err) = self.expiry.arm(id.clone(), self.retention) {
            self.artifacts.delete(&id).await;
            return Err(err);
        }

        Ok(DownloadHandle {
            id,
            expires_in: self.retention,
        })
    }

    pub async fn download(&self, id: &str) -> Result<Artifact> {
        let result = self.artifacts.get(id).await;
        self.observability.record_download(result.is_ok());
        if result.is_err() {
            tracing::debug!(artifact_id = id, "download miss");
        }
        result
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        let mut snapshot = self.observability.snapshot();
        snapshot.artifacts_available = self.artifacts.len() as u64;
        snapshot.artifacts_expired = self.expiry.expired_total();
        snapshot.pending_expiries = self.expiry.pending() as u64;
        snapshot.tracked_clients = self.quota.tracked_clients() as u64;
        snapshot
    }
}

impl std::fmt::Debug for Studio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Studio")
            .field("provider", &self.generator.provider())
            .field("artifacts", &self.artifacts)
            .field("quota", &self.quota)
            .field("retention", &self.retention)
            .finish()
    }
}
