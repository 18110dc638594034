use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::providers::gemini;
use crate::quota::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECONDS, QuotaConfig};
use crate::{PortraitError, Result};

const API_KEY_ENV_KEYS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

#[derive(Debug, Parser)]
#[command(
    name = "britishme-server",
    version,
    about = "Restyles uploaded portraits and serves the result through short-lived download links"
)]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(long, env = "BRITISHME_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: String,

    /// Generation API key. Falls back to GEMINI_API_KEY / GOOGLE_API_KEY from the dotenv file or the environment.
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long, env = "GEMINI_BASE_URL", default_value = gemini::DEFAULT_BASE_URL)]
    pub gemini_base_url: String,

    #[arg(long, env = "GEMINI_MODEL", default_value = gemini::DEFAULT_MODEL)]
    pub gemini_model: String,

    /// Where generated images are kept until they expire. Defaults to `<tmp>/britishme`.
    #[arg(long, env = "BRITISHME_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Requests admitted per client per window.
    #[arg(long, env = "BRITISHME_QUOTA_MAX_REQUESTS", default_value_t = DEFAULT_MAX_REQUESTS)]
    pub quota_max_requests: u32,

    #[arg(long, env = "BRITISHME_QUOTA_WINDOW_SECS", default_value_t = DEFAULT_WINDOW_SECONDS)]
    pub quota_window_secs: u64,

    /// Seconds a generated image stays downloadable.
    #[arg(long, env = "BRITISHME_RETENTION_SECS", default_value_t = 120)]
    pub retention_secs: u64,

    #[arg(long, env = "BRITISHME_UPSTREAM_TIMEOUT_SECS", default_value_t = 120)]
    pub upstream_timeout_secs: u64,

    #[arg(long, env = "BRITISHME_MAX_UPLOAD_BYTES", default_value_t = crate::http::DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Emit logs as JSON lines.
    #[arg(long, env = "BRITISHME_JSON_LOGS")]
    pub json_logs: bool,

    /// Dotenv file consulted for the API key; ignored when missing.
    #[arg(long, env = "BRITISHME_DOTENV", default_value = ".env")]
    pub dotenv: PathBuf,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub output_dir: PathBuf,
    pub quota: QuotaConfig,
    pub retention: Duration,
    pub upstream_timeout: Duration,
    pub max_upload_bytes: usize,
    pub json_logs: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("api_key", &"<redacted>")
            .field("gemini_base_url", &self.gemini_base_url)
            .field("gemini_model", &self.gemini_model)
            .field("output_dir", &self.output_dir)
            .field("quota", &self.quota)
            .field("retention", &self.retention)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_args(args: ServerArgs, env: &Env) -> Result<Self> {
        let api_key = match args.api_key.filter(|key| !key.trim().is_empty()) {
            Some(key) => key,
            None => API_KEY_ENV_KEYS
                .iter()
                .find_map(|key| env.get(key))
                .ok_or_else(|| {
                    PortraitError::Config(format!(
                        "missing generation api key (set --api-key or one of: {})",
                        API_KEY_ENV_KEYS.join(", ")
                    ))
                })?,
        };

        if args.upstream_timeout_secs == 0 {
            return Err(PortraitError::Config(
                "--upstream-timeout-secs must be greater than zero".to_string(),
            ));
        }
        if args.max_upload_bytes == 0 {
            return Err(PortraitError::Config(
                "--max-upload-bytes must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            listen: args.listen,
            api_key: api_key.trim().to_string(),
            gemini_base_url: args.gemini_base_url,
            gemini_model: args.gemini_model,
            output_dir: args
                .output_dir
                .unwrap_or_else(|| std::env::temp_dir().join("britishme")),
            quota: QuotaConfig {
                max_requests: args.quota_max_requests,
                window_seconds: args.quota_window_secs,
            },
            retention: Duration::from_secs(args.retention_secs),
            upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
            max_upload_bytes: args.max_upload_bytes,
            json_logs: args.json_logs,
        })
    }
}

/// Dotenv values layered over the process environment.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.dotenv.keys().map(|key| key.as_str()).collect();
        f.debug_struct("Env").field("dotenv_keys", &keys).finish()
    }
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    /// Reads `path` if it exists; a missing file yields an empty dotenv layer.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse_dotenv(&contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(PortraitError::Config(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.dotenv.get(key) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::<String, String>::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }

        let raw_value = raw_value.trim();
        let value = raw_value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| raw_value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(raw_value);

        if value.trim().is_empty() {
            continue;
        }

        out.insert(key.to_string(), value.to_string());
    }

    out
}
