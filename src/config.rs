use std::time::Duration;

/// Name shown in a push alert when the caller has neither display name nor handle.
pub const FALLBACK_CALLER_NAME: &str = "Someone";

/// Tunables for the call coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// How long a call may ring before it is marked missed.
    pub ring_timeout: Duration,
    /// Lifetime of a pending offer waiting for an offline callee.
    pub pending_ttl: Duration,
    /// Whether an unreachable callee gets a push alert.
    pub push_fallback: bool,
    pub fallback_caller_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(sigcore::RING_TIMEOUT_SECS),
            pending_ttl: Duration::from_secs(120),
            push_fallback: true,
            fallback_caller_name: FALLBACK_CALLER_NAME.to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn without_push(mut self) -> Self {
        self.push_fallback = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ring_window() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.ring_timeout, Duration::from_secs(90));
        assert!(config.pending_ttl > config.ring_timeout);
        assert!(config.push_fallback);
    }

    #[test]
    fn builder_overrides() {
        let config = CoordinatorConfig::default()
            .with_ring_timeout(Duration::from_secs(5))
            .without_push();
        assert_eq!(config.ring_timeout, Duration::from_secs(5));
        assert!(!config.push_fallback);
    }
}
