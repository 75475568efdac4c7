//! Bodies of the endpoints served locally rather than forwarded.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;

/// Configured state of one filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterStatus {
    pub name: &'static str,
    pub enabled: bool,
}

impl FilterStatus {
    /// Every filter in chain order.
    pub fn from_config(config: &Config) -> Vec<Self> {
        vec![
            Self::new("context", config.context.enabled),
            Self::new("trusted_shared_network", config.shared_networks.enabled),
            Self::new("last_ip_check", config.last_ip_check.enabled),
            Self::new("default_ip_policy", config.ip_policy.enabled),
            Self::new("nova_interaction", config.nova_interaction.enabled),
        ]
    }

    fn new(name: &'static str, enabled: bool) -> Self {
        Self { name, enabled }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Service version
    pub version: String,
    /// Neutron endpoint requests are forwarded to
    pub upstream_url: String,
    /// Whether `X_WAFFLEHAUS_<FILTER>_ENABLED` headers are honoured
    pub runtime_override: bool,
    pub filters: Vec<FilterStatus>,
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_status_follows_config() {
        let mut config = Config::default();
        config.nova_interaction.enabled = true;
        config.last_ip_check.enabled = false;

        let filters = FilterStatus::from_config(&config);
        assert_eq!(filters.len(), 5);
        assert!(filters.contains(&FilterStatus::new("nova_interaction", true)));
        assert!(filters.contains(&FilterStatus::new("last_ip_check", false)));
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            upstream_url: "http://127.0.0.1:9696".to_string(),
            runtime_override: false,
            filters: vec![FilterStatus::new("context", true)],
            uptime_seconds: 3,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("{\"name\":\"context\",\"enabled\":true}"));
    }
}
