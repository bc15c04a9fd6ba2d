//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, ensure};

/// Default CSRF token lifetime in seconds (10 minutes).
const DEFAULT_TTL_SECS: u64 = 600;

/// Longest accepted CSRF token lifetime in seconds (365 days). The expiry
/// queue cannot schedule deadlines much beyond two years out.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Default cap on simultaneously live CSRF tokens.
const DEFAULT_MAX_LIVE_TOKENS: usize = 10_000;

/// CSRF token manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfConfig {
    /// Lifetime of a token when `issue` is not given one (default: 600s).
    pub ttl: Duration,

    /// Maximum number of live tokens before `issue` refuses (default: 10000).
    pub max_live_tokens: usize,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_live_tokens: DEFAULT_MAX_LIVE_TOKENS,
        }
    }
}

impl CsrfConfig {
    /// Set the default token lifetime.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the live token cap.
    pub fn max_live_tokens(mut self, max: usize) -> Self {
        self.max_live_tokens = max;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `CSRF_TTL_SECS` and `CSRF_MAX_LIVE_TOKENS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ttl_secs: u64 = lookup("CSRF_TTL_SECS")
            .unwrap_or_else(|| DEFAULT_TTL_SECS.to_string())
            .trim()
            .parse()
            .context("CSRF_TTL_SECS must be a valid u64")?;
        ensure!(ttl_secs > 0, "CSRF_TTL_SECS must be greater than zero");
        ensure!(
            ttl_secs <= MAX_TTL_SECS,
            "CSRF_TTL_SECS must be at most {MAX_TTL_SECS}"
        );

        let max_live_tokens: usize = lookup("CSRF_MAX_LIVE_TOKENS")
            .unwrap_or_else(|| DEFAULT_MAX_LIVE_TOKENS.to_string())
            .trim()
            .parse()
            .context("CSRF_MAX_LIVE_TOKENS must be a valid usize")?;
        ensure!(
            max_live_tokens > 0,
            "CSRF_MAX_LIVE_TOKENS must be greater than zero"
        );

        Ok(Self {
            ttl: Duration::from_secs(ttl_secs),
            max_live_tokens,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = CsrfConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CsrfConfig::default());
        assert_eq!(config.ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_values_from_lookup() {
        let config = CsrfConfig::from_lookup(lookup(&[
            ("CSRF_TTL_SECS", "30"),
            ("CSRF_MAX_LIVE_TOKENS", " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.max_live_tokens, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = CsrfConfig::from_lookup(lookup(&[("CSRF_TTL_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("CSRF_TTL_SECS"));

        assert!(CsrfConfig::from_lookup(lookup(&[("CSRF_TTL_SECS", "0")])).is_err());
        assert!(CsrfConfig::from_lookup(lookup(&[("CSRF_MAX_LIVE_TOKENS", "0")])).is_err());
    }

    #[test]
    fn test_ttl_upper_bound() {
        let max = MAX_TTL_SECS.to_string();
        let config = CsrfConfig::from_lookup(lookup(&[("CSRF_TTL_SECS", max.as_str())])).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(MAX_TTL_SECS));

        let too_long = (MAX_TTL_SECS + 1).to_string();
        let err = CsrfConfig::from_lookup(lookup(&[("CSRF_TTL_SECS", too_long.as_str())]))
            .unwrap_err();
        assert!(err.to_string().contains("at most"));

        let absurd = u64::MAX.to_string();
        assert!(CsrfConfig::from_lookup(lookup(&[("CSRF_TTL_SECS", absurd.as_str())])).is_err());
    }
}
