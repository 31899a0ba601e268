use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

// ── Idempotency configuration ─────────────────────────────────────

/// Recognized options for the subsystem. Hosts usually embed this as an
/// `[idempotency]` table inside their own config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// When false the middleware is a no-op pass-through.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Window during which a key remains claimable/replayable.
    #[serde(default = "default_replay_ttl_hours")]
    pub replay_ttl_hours: i64,

    /// Lower bound on client-supplied key length.
    #[serde(default = "default_min_key_length")]
    pub min_key_length: usize,

    /// Upper bound on client-supplied key length.
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,

    /// Fixed interval between reaper sweeps, independent of traffic.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Cap on buffered request bodies; oversized requests are rejected
    /// before any store interaction.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_replay_ttl_hours() -> i64 {
    24
}

fn default_min_key_length() -> usize {
    8
}

fn default_max_key_length() -> usize {
    128
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            replay_ttl_hours: default_replay_ttl_hours(),
            min_key_length: default_min_key_length(),
            max_key_length: default_max_key_length(),
            reaper_interval_secs: default_reaper_interval_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl IdempotencyConfig {
    /// Parse from a TOML document containing the bare option table.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parse idempotency config")
    }

    /// Replay TTL, floored at one hour so a zero or negative setting can
    /// never produce records that expire before their own completion.
    pub fn ttl(&self) -> Duration {
        Duration::hours(self.replay_ttl_hours.max(1))
    }

    /// Key length bounds, normalized: min ≥ 1, max ≥ min.
    pub fn key_bounds(&self) -> (usize, usize) {
        let min = self.min_key_length.max(1);
        let max = self.max_key_length.max(min);
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = IdempotencyConfig::default();
        assert!(config.enabled);
        assert_eq!(config.replay_ttl_hours, 24);
        assert_eq!(config.min_key_length, 8);
        assert_eq!(config.max_key_length, 128);
        assert_eq!(config.reaper_interval_secs, 300);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = IdempotencyConfig::from_toml_str("").unwrap();
        assert_eq!(config.replay_ttl_hours, 24);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config =
            IdempotencyConfig::from_toml_str("replay_ttl_hours = 48\nmin_key_length = 16\n")
                .unwrap();
        assert_eq!(config.replay_ttl_hours, 48);
        assert_eq!(config.min_key_length, 16);
        assert_eq!(config.max_key_length, 128);
        assert!(config.enabled);
    }

    #[test]
    fn ttl_is_floored_at_one_hour() {
        let config = IdempotencyConfig {
            replay_ttl_hours: 0,
            ..IdempotencyConfig::default()
        };
        assert_eq!(config.ttl(), Duration::hours(1));
    }

    #[test]
    fn key_bounds_keep_max_at_least_min() {
        let config = IdempotencyConfig {
            min_key_length: 32,
            max_key_length: 4,
            ..IdempotencyConfig::default()
        };
        assert_eq!(config.key_bounds(), (32, 32));
    }
}
