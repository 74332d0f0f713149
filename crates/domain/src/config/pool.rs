use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Idle-eviction settings for the conversation-scoped client pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle TTL in seconds before an entry is reaped. Clamped to at least
    /// one minute.
    #[serde(default = "d_ttl_secs")]
    pub ttl_secs: u64,
    /// Reaper tick in seconds. Defaults to `ttl / 2`, floored at one minute.
    #[serde(default)]
    pub reaper_interval_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl_secs: d_ttl_secs(),
            reaper_interval_secs: None,
        }
    }
}

impl PoolConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.max(60))
    }

    pub fn reaper_interval(&self) -> Duration {
        match self.reaper_interval_secs {
            Some(secs) => Duration::from_secs(secs.max(60)),
            None => Duration::from_secs((self.ttl_secs / 2).max(60)),
        }
    }
}

fn d_ttl_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_clamped_to_one_minute() {
        let config = PoolConfig {
            ttl_secs: 5,
            reaper_interval_secs: None,
        };
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.reaper_interval(), Duration::from_secs(60));
    }

    #[test]
    fn default_interval_is_half_ttl() {
        let config = PoolConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(300));
        assert_eq!(config.reaper_interval(), Duration::from_secs(150));
    }
}
