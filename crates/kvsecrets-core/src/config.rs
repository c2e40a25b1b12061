//! Secrets layer configuration.
//!
//! Loads the cache and migration tunables from environment variables with
//! sensible defaults. All settings can be overridden via `KVSECRETS_*`
//! environment variables.

use std::time::Duration;

/// Default lifetime of a cached read.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Default interval between expired-entry sweeps.
pub const DEFAULT_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default quiet period the migration waits for provisioning to settle.
pub const DEFAULT_PROVISIONING_QUIET_PERIOD: Duration = Duration::from_secs(5);

/// Tunables for the cache decorator and the migration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsConfig {
    /// How long a cached read stays valid.
    pub cache_ttl: Duration,
    /// How often expired cache entries are evicted.
    pub cache_sweep_interval: Duration,
    /// Purge legacy inline secrets from data sources during migration.
    pub disable_secrets_compatibility: bool,
    /// How long no data source may be created before the migration starts.
    pub provisioning_quiet_period: Duration,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_sweep_interval: DEFAULT_CACHE_SWEEP_INTERVAL,
            disable_secrets_compatibility: false,
            provisioning_quiet_period: DEFAULT_PROVISIONING_QUIET_PERIOD,
        }
    }
}

impl SecretsConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KVSECRETS_CACHE_TTL_SECS`: cache entry lifetime (default: `5`)
    /// - `KVSECRETS_CACHE_SWEEP_SECS`: sweep interval (default: `300`)
    /// - `KVSECRETS_DISABLE_SECRETS_COMPATIBILITY`: purge legacy payloads (default: `false`)
    /// - `KVSECRETS_PROVISIONING_QUIET_SECS`: provisioning quiet period (default: `5`)
    ///
    /// Unparseable or zero durations fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|&v| v > 0)
                .map_or(default, Duration::from_secs)
        };

        let disable_secrets_compatibility = lookup("KVSECRETS_DISABLE_SECRETS_COMPATIBILITY")
            .is_some_and(|v| v == "true" || v == "1");

        Self {
            cache_ttl: secs("KVSECRETS_CACHE_TTL_SECS", DEFAULT_CACHE_TTL),
            cache_sweep_interval: secs("KVSECRETS_CACHE_SWEEP_SECS", DEFAULT_CACHE_SWEEP_INTERVAL),
            disable_secrets_compatibility,
            provisioning_quiet_period: secs(
                "KVSECRETS_PROVISIONING_QUIET_SECS",
                DEFAULT_PROVISIONING_QUIET_PERIOD,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(SecretsConfig::from_lookup(lookup(&[])), SecretsConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = SecretsConfig::from_lookup(lookup(&[
            ("KVSECRETS_CACHE_TTL_SECS", "30"),
            ("KVSECRETS_CACHE_SWEEP_SECS", "60"),
            ("KVSECRETS_DISABLE_SECRETS_COMPATIBILITY", "true"),
            ("KVSECRETS_PROVISIONING_QUIET_SECS", "2"),
        ]));
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(60));
        assert!(config.disable_secrets_compatibility);
        assert_eq!(config.provisioning_quiet_period, Duration::from_secs(2));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = SecretsConfig::from_lookup(lookup(&[
            ("KVSECRETS_CACHE_TTL_SECS", "soon"),
            ("KVSECRETS_CACHE_SWEEP_SECS", "0"),
            ("KVSECRETS_DISABLE_SECRETS_COMPATIBILITY", "yes please"),
        ]));
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.cache_sweep_interval, DEFAULT_CACHE_SWEEP_INTERVAL);
        assert!(!config.disable_secrets_compatibility);
    }
}
