//! Session tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a peer session.
///
/// Every field has a default matching the reference game behaviour, so a
/// JSON config file only needs to name the fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum gap between two accepted creations by this peer
    pub creation_cooldown_ms: u64,

    /// Role switch triggers closer together than this collapse into one
    pub role_switch_debounce_ms: u64,

    /// Period of the debt decay tick
    pub decay_interval_ms: u64,

    /// Debt removed per decay tick while Collapser
    pub decay_amount: f64,

    /// Debt removed per successful Collapser interaction
    pub interaction_penalty: f64,

    /// Draws below this value freeze, the rest shatter
    pub freeze_probability: f64,

    /// Cosmetic fade before reality-shatter removal
    pub fade_duration_ms: u64,

    /// Period of prophecy text rotation
    pub prophecy_interval_ms: u64,

    /// Fulfilments needed to trigger a reality-shatter
    pub prophecy_threshold: u32,

    /// Retry period while the channel is down
    pub reconnect_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            creation_cooldown_ms: 2_000,
            role_switch_debounce_ms: 300,
            decay_interval_ms: 60_000,
            decay_amount: 0.1,
            interaction_penalty: 5.0,
            freeze_probability: 0.5,
            fade_duration_ms: 2_000,
            prophecy_interval_ms: 180_000,
            prophecy_threshold: 10,
            reconnect_interval_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Sets the creation cooldown.
    pub fn with_creation_cooldown_ms(mut self, ms: u64) -> Self {
        self.creation_cooldown_ms = ms;
        self
    }

    /// Sets the role switch debounce window.
    pub fn with_role_switch_debounce_ms(mut self, ms: u64) -> Self {
        self.role_switch_debounce_ms = ms;
        self
    }

    /// Sets the decay tick period.
    pub fn with_decay_interval_ms(mut self, ms: u64) -> Self {
        self.decay_interval_ms = ms;
        self
    }

    /// Sets the freeze probability (clamped to [0, 1]).
    pub fn with_freeze_probability(mut self, p: f64) -> Self {
        self.freeze_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Sets the prophecy fulfilment threshold (at least 1).
    pub fn with_prophecy_threshold(mut self, threshold: u32) -> Self {
        self.prophecy_threshold = threshold.max(1);
        self
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms)
    }

    pub fn prophecy_interval(&self) -> Duration {
        Duration::from_millis(self.prophecy_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.creation_cooldown_ms, 2_000);
        assert_eq!(config.role_switch_debounce_ms, 300);
        assert_eq!(config.decay_interval(), Duration::from_secs(60));
        assert_eq!(config.interaction_penalty, 5.0);
        assert_eq!(config.prophecy_threshold, 10);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "creation_cooldown_ms": 500 }"#).unwrap();
        assert_eq!(config.creation_cooldown_ms, 500);
        assert_eq!(config.decay_amount, 0.1);
        assert_eq!(config.fade_duration_ms, 2_000);
    }

    #[test]
    fn test_builders_clamp() {
        let config = SessionConfig::default()
            .with_freeze_probability(3.0)
            .with_prophecy_threshold(0);
        assert_eq!(config.freeze_probability, 1.0);
        assert_eq!(config.prophecy_threshold, 1);
    }
}
