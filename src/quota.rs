use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};

pub const DEFAULT_MAX_REQUESTS: u32 = 3;
pub const DEFAULT_WINDOW_SECONDS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_seconds: DEFAULT_WINDOW_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientQuota {
    pub count: u32,
    pub window_expires_at: u64,
}

/// Per-client request counters with a rolling window.
///
/// Entries are never removed; a stale entry is reset in place the next time its client shows up.
pub struct QuotaTracker {
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, ClientQuota>>,
}

impl QuotaTracker {
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Check-and-increment under one lock, so concurrent callers for the same key
    /// can never both take the last slot.
    pub fn admit(&self, client_key: &str) -> bool {
        if self.config.max_requests == 0 {
            return false;
        }

        let now = self.clock.now_epoch_seconds();
        let expires_at = now.saturating_add(self.config.window_seconds);

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(quota) = entries.get_mut(client_key) else {
            entries.insert(
                client_key.to_string(),
                ClientQuota {
                    count: 1,
                    window_expires_at: expires_at,
                },
            );
            return true;
        };

        if now > quota.window_expires_at {
            quota.count = 1;
            quota.window_expires_at = expires_at;
            return true;
        }

        if quota.count >= self.config.max_requests {
            return false;
        }

        quota.count = quota.count.saturating_add(1);
        true
    }

    /// Current state for `client_key`, with an expired window reported as absent.
    pub fn snapshot(&self, client_key: &str) -> Option<ClientQuota> {
        let now = self.clock.now_epoch_seconds();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(client_key)
            .filter(|quota| now <= quota.window_expires_at)
            .cloned()
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaTracker")
            .field("config", &self.config)
            .field("tracked_clients", &self.tracked_clients())
            .finish()
    }
}
