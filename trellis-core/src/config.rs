//! Engine Configuration
//!
//! Tunables for drains and host cycles. The defaults match what a UI host
//! expects; embedders can override them from JSON.

use serde::{Deserialize, Serialize};

/// Default cap on how often one effect may run within a single drain.
pub const DEFAULT_RECURSION_LIMIT: u32 = 100;

/// Default cap on consecutive host cycles requested without settling.
pub const DEFAULT_CYCLE_LIMIT: u32 = 100;

/// Runtime configuration for contexts and schedulers.
///
/// # Example
///
/// ```rust
/// use trellis_core::config::ReactiveConfig;
///
/// let config = ReactiveConfig::from_json(r#"{ "recursion_limit": 8 }"#).unwrap();
/// assert_eq!(config.recursion_limit, 8);
/// assert_eq!(config.cycle_limit, trellis_core::config::DEFAULT_CYCLE_LIMIT);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// How many times one effect may run within a single drain before it is
    /// dropped from that drain with a warning.
    pub recursion_limit: u32,

    /// How many host cycles may be requested back to back, each leaving work
    /// behind, before the scheduler gives up and discards the leftovers.
    pub cycle_limit: u32,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            cycle_limit: DEFAULT_CYCLE_LIMIT,
        }
    }
}

impl ReactiveConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = ReactiveConfig::from_json("{}").unwrap();
        assert_eq!(config, ReactiveConfig::default());
    }

    #[test]
    fn fields_override_individually() {
        let config = ReactiveConfig::from_json(r#"{ "cycle_limit": 3 }"#).unwrap();
        assert_eq!(config.cycle_limit, 3);
        assert_eq!(config.recursion_limit, DEFAULT_RECURSION_LIMIT);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(ReactiveConfig::from_json("{ recursion_limit: }").is_err());
    }
}
