use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use parley_core::ids::ClientId;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum admitted requests per client inside one window.
    pub limit: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 20,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window request budget per connected client. State lives only in
/// memory and is dropped when the client disconnects.
pub struct RateLimiter {
    config: RateLimitConfig,
    requests: DashMap<ClientId, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            requests: DashMap::new(),
        }
    }

    /// Admit one request if the client is under budget. A rejected request
    /// does not consume budget.
    pub fn allow(&self, client_id: &ClientId) -> bool {
        let now = Instant::now();
        let mut entry = self.requests.entry(client_id.clone()).or_default();
        let queue = entry.value_mut();

        while let Some(oldest) = queue.front() {
            if now.duration_since(*oldest) > self.config.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.config.limit {
            debug!(client_id = %client_id, in_window = queue.len(), "rate limit exceeded");
            return false;
        }

        queue.push_back(now);
        true
    }

    /// Forget a client's history.
    pub fn clear(&self, client_id: &ClientId) {
        self.requests.remove(client_id);
    }

    /// Requests currently counted against a client.
    pub fn in_window(&self, client_id: &ClientId) -> usize {
        self.requests.get(client_id).map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
