//! Output cache configuration.
//!
//! Controls the response cache via the `[cache]` section of `output-cache.toml`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use super::endpoint::EndpointPolicy;

pub(crate) const DEFAULT_MEDIA_TYPE: &str = "application/json";
pub(crate) const DEFAULT_SUPPORTED_MEDIA_TYPES: [&str; 6] = [
    "application/json",
    "text/json",
    "application/xml",
    "text/xml",
    "text/html",
    "text/plain",
];
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
pub(crate) const DEFAULT_PURGE_INTERVAL_MS: u64 = 60_000;

/// Output cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputCacheConfig {
    /// Master switch for lookups and stores.
    pub enabled: bool,
    /// Media type used when negotiation yields nothing supported.
    pub default_media_type: String,
    /// Media types accepted from the `Accept` header.
    pub supported_media_types: Vec<String>,
    /// Responses with larger bodies pass through uncached.
    pub max_body_bytes: usize,
    /// Expired-entry sweep interval (ms); `0` disables the sweeper.
    pub purge_interval_ms: u64,
    /// Policies by controller then action, overriding the ones set in code.
    pub endpoints: HashMap<String, HashMap<String, EndpointPolicy>>,
}

impl Default for OutputCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_media_type: DEFAULT_MEDIA_TYPE.to_string(),
            supported_media_types: DEFAULT_SUPPORTED_MEDIA_TYPES
                .iter()
                .map(|media_type| media_type.to_string())
                .collect(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            purge_interval_ms: DEFAULT_PURGE_INTERVAL_MS,
            endpoints: HashMap::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for OutputCacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_media_type: settings.default_media_type.clone(),
            supported_media_types: settings.supported_media_types.clone(),
            max_body_bytes: settings.max_body_bytes,
            purge_interval_ms: settings.purge_interval_ms,
            endpoints: settings.endpoints.clone(),
        }
    }
}

impl OutputCacheConfig {
    /// Configured policy for `controller`/`action`, matched case-insensitively.
    pub fn endpoint_policy(&self, controller: &str, action: &str) -> Option<&EndpointPolicy> {
        self.endpoints
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(controller))
            .and_then(|(_, actions)| {
                actions
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(action))
                    .map(|(_, policy)| policy)
            })
    }

    /// Sweep interval, `None` when disabled.
    pub fn purge_interval(&self) -> Option<Duration> {
        (self.purge_interval_ms > 0).then(|| Duration::from_millis(self.purge_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::time::CachePolicy;

    #[test]
    fn default_values() {
        let config = OutputCacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.default_media_type, "application/json");
        assert!(
            config
                .supported_media_types
                .contains(&"text/xml".to_string())
        );
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
        assert_eq!(config.purge_interval(), Some(Duration::from_secs(60)));
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn zero_interval_disables_sweeper() {
        let config = OutputCacheConfig {
            purge_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.purge_interval(), None);
    }

    #[test]
    fn endpoint_policy_lookup_ignores_case() {
        let mut actions = HashMap::new();
        actions.insert(
            "GetById".to_string(),
            EndpointPolicy::new(CachePolicy::fixed(10, 10)),
        );
        let mut endpoints = HashMap::new();
        endpoints.insert("teams".to_string(), actions);

        let config = OutputCacheConfig {
            endpoints,
            ..Default::default()
        };

        let policy = config
            .endpoint_policy("Teams", "getbyid")
            .expect("configured policy");
        assert_eq!(policy.policy, CachePolicy::fixed(10, 10));
        assert!(config.endpoint_policy("teams", "list").is_none());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: OutputCacheConfig = serde_json::from_str(
            r#"{
                "max_body_bytes": 1024,
                "endpoints": {
                    "teams": {
                        "get": { "policy": { "kind": "recurring_daily", "hour": 3 } }
                    }
                }
            }"#,
        )
        .expect("config should deserialize");

        assert!(config.enabled);
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(
            config
                .endpoint_policy("teams", "get")
                .map(|policy| policy.policy),
            Some(CachePolicy::daily(3, 0, 0).expect("valid"))
        );
    }
}
