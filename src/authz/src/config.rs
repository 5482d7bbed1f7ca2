//! Engine configuration
//!
//! Environment variables read by [`AuthzConfig::from_env`]:
//!
//! - `PORT` - HTTP server port (default: 8080)
//! - `CACHE_TTL` - Permission cache TTL in seconds (default: 300)
//! - `CACHE_KEY_PREFIX` - Permission cache key namespace (default: `authz:perms:`)
//! - `CACHE_SIZE` - In-memory cache capacity (default: 10000)
//! - `PAT_PREFIX` - Personal access token prefix (default: `pat_`)
//! - `AUDIT_BUFFER` - Audit channel capacity (default: 1024)

use crate::auth::DEFAULT_PAT_PREFIX;
use crate::cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// HTTP server port
    pub port: u16,

    /// Permission cache settings
    pub cache: CacheConfig,

    /// Literal prefix identifying personal access tokens
    pub pat_prefix: String,

    /// Capacity of the audit channel
    pub audit_buffer: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cache: CacheConfig::default(),
            pat_prefix: DEFAULT_PAT_PREFIX.to_string(),
            audit_buffer: 1024,
        }
    }
}

impl AuthzConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mut cache = defaults.cache;
        cache.ttl_secs = parse_or(&lookup, "CACHE_TTL", cache.ttl_secs);
        cache.capacity = parse_or(&lookup, "CACHE_SIZE", cache.capacity);
        if let Some(prefix) = lookup("CACHE_KEY_PREFIX").filter(|p| !p.is_empty()) {
            cache.key_prefix = prefix;
        }

        Self {
            port: parse_or(&lookup, "PORT", defaults.port),
            cache,
            pat_prefix: lookup("PAT_PREFIX")
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.pat_prefix),
            audit_buffer: parse_or(&lookup, "AUDIT_BUFFER", defaults.audit_buffer),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}='{}'", key, raw);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AuthzConfig::from_lookup(lookup(&[]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.key_prefix, "authz:perms:");
        assert_eq!(config.pat_prefix, "pat_");
    }

    #[test]
    fn test_overrides() {
        let config = AuthzConfig::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("CACHE_TTL", "60"),
            ("CACHE_KEY_PREFIX", "t1:"),
            ("PAT_PREFIX", "tok_"),
        ]));
        assert_eq!(config.port, 9000);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.key_prefix, "t1:");
        assert_eq!(config.pat_prefix, "tok_");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = AuthzConfig::from_lookup(lookup(&[("PORT", "http"), ("CACHE_TTL", "-1")]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn test_partial_json() {
        let config: AuthzConfig = serde_json::from_str(r#"{"port": 3000}"#).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache.ttl_secs, 300);
    }
}
