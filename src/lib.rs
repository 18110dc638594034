//! Portrait restyling service.
//!
//! An upload is admitted against a per-client quota, sent to an image generation
//! API with a style instruction, and the result is kept just long enough to be
//! downloaded through `/download/<id>`.

pub mod artifact;
pub mod clock;
pub mod config;
mod error;
pub mod http;
pub mod logging;
pub mod observability;
pub mod providers;
pub mod quota;
pub mod scheduler;
pub mod studio;
pub mod style;
pub mod utils;

pub use artifact::{Artifact, ArtifactId, ArtifactState, ArtifactStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ARTIFACT_NOT_FOUND_MESSAGE, PortraitError, Result};
pub use http::{StudioHttpState, router};
pub use providers::{GeminiImageClient, GeneratedImage, ImageGenerator, SourceImage};
pub use quota::{ClientQuota, QuotaConfig, QuotaTracker};
pub use scheduler::ExpiryScheduler;
pub use studio::{DownloadHandle, GenerationRequest, Studio};
pub use style::Style;
