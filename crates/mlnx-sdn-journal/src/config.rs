//! Synchronizer configuration.
//!
//! Values come from serde (e.g. a config file section) or from environment
//! variables via [`SdnConfig::from_env`].

use std::time::Duration;

use mlnx_sdn_core::CoreError;
use mlnx_sdn_store::RetryLimit;
use serde::Deserialize;

/// Physnet wildcard accepted by `physical_networks`.
pub const ANY_PHYSNET: &str = "*";

/// Configuration for the controller client and the journal workers.
#[derive(Debug, Clone, Deserialize)]
pub struct SdnConfig {
    /// Whether journal rows are relayed to the controller at all.
    #[serde(default = "SdnConfig::default_true")]
    pub sync_enabled: bool,

    /// Base URL of the controller, e.g. `https://neo:443/neo`.
    #[serde(default)]
    pub url: String,

    /// Cloud domain name used in mutating request paths.
    #[serde(default = "SdnConfig::default_domain")]
    pub domain: String,

    /// Token sent as `Authorization: Basic <token>`.
    #[serde(default = "SdnConfig::default_token")]
    pub token: String,

    /// HTTP timeout in seconds.
    #[serde(default = "SdnConfig::default_timeout")]
    pub timeout_seconds: u64,

    /// Interval after which the sync worker wakes even without a signal.
    #[serde(default = "SdnConfig::default_sync_timeout")]
    pub sync_timeout_seconds: u64,

    /// Retries before a row is failed; `-1` retries forever.
    #[serde(default = "SdnConfig::default_retry_count")]
    pub retry_count: i64,

    /// Interval between maintenance runs, in seconds.
    #[serde(default = "SdnConfig::default_maintenance_interval")]
    pub maintenance_interval_seconds: u64,

    /// How long completed rows are kept; `-1` keeps them forever.
    #[serde(default = "SdnConfig::default_completed_rows_retention")]
    pub completed_rows_retention_seconds: i64,

    /// Age after which a `PROCESSING` row is considered abandoned.
    #[serde(default = "SdnConfig::default_processing_timeout")]
    pub processing_timeout_seconds: u64,

    /// Physnets whose events are relayed; `*` means all.
    #[serde(default = "SdnConfig::default_physical_networks")]
    pub physical_networks: Vec<String>,

    /// Allow binding normal ports on the `InfiniBand` physnets below.
    #[serde(default)]
    pub bind_normal_ports: bool,

    /// `InfiniBand` physnets where normal ports may be bound.
    #[serde(default)]
    pub bind_normal_ports_physnets: Vec<String>,

    /// Verify the controller's TLS certificate.
    #[serde(default)]
    pub cert_verify: bool,

    /// CA bundle used when `cert_verify` is set; empty means system roots.
    #[serde(default)]
    pub cert_path: String,
}

impl SdnConfig {
    const fn default_true() -> bool {
        true
    }

    fn default_domain() -> String {
        "cloudx".to_string()
    }

    fn default_token() -> String {
        "abcdef".to_string()
    }

    const fn default_timeout() -> u64 {
        10
    }

    const fn default_sync_timeout() -> u64 {
        10
    }

    const fn default_retry_count() -> i64 {
        -1
    }

    const fn default_maintenance_interval() -> u64 {
        300 // 5 minutes
    }

    const fn default_completed_rows_retention() -> i64 {
        600
    }

    const fn default_processing_timeout() -> u64 {
        100
    }

    fn default_physical_networks() -> Vec<String> {
        vec![ANY_PHYSNET.to_string()]
    }

    /// Load configuration from `SDN_*` environment variables, falling back
    /// to defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SDN_SYNC_ENABLED") {
            if let Ok(b) = val.parse() {
                config.sync_enabled = b;
            }
        }
        if let Ok(val) = std::env::var("SDN_URL") {
            config.url = val;
        }
        if let Ok(val) = std::env::var("SDN_DOMAIN") {
            config.domain = val;
        }
        if let Ok(val) = std::env::var("SDN_TOKEN") {
            config.token = val;
        }
        if let Ok(val) = std::env::var("SDN_TIMEOUT") {
            if let Ok(n) = val.parse() {
                config.timeout_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("SDN_SYNC_TIMEOUT") {
            if let Ok(n) = val.parse() {
                config.sync_timeout_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("SDN_RETRY_COUNT") {
            if let Ok(n) = val.parse() {
                config.retry_count = n;
            }
        }
        if let Ok(val) = std::env::var("SDN_MAINTENANCE_INTERVAL") {
            if let Ok(n) = val.parse() {
                config.maintenance_interval_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("SDN_COMPLETED_ROWS_RETENTION") {
            if let Ok(n) = val.parse() {
                config.completed_rows_retention_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("SDN_PROCESSING_TIMEOUT") {
            if let Ok(n) = val.parse() {
                config.processing_timeout_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("SDN_PHYSICAL_NETWORKS") {
            config.physical_networks = split_list(&val);
        }
        if let Ok(val) = std::env::var("SDN_BIND_NORMAL_PORTS") {
            if let Ok(b) = val.parse() {
                config.bind_normal_ports = b;
            }
        }
        if let Ok(val) = std::env::var("SDN_BIND_NORMAL_PORTS_PHYSNETS") {
            config.bind_normal_ports_physnets = split_list(&val);
        }
        if let Ok(val) = std::env::var("SDN_CERT_VERIFY") {
            if let Ok(b) = val.parse() {
                config.cert_verify = b;
            }
        }
        if let Ok(val) = std::env::var("SDN_CERT_PATH") {
            config.cert_path = val;
        }

        config
    }

    /// Check the options the controller client cannot work without.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if `url` or `token` is empty, or if
    /// `bind_normal_ports_physnets` is not a subset of `physical_networks`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.is_empty() {
            return Err(CoreError::config("sdn url is required"));
        }
        if self.token.is_empty() {
            return Err(CoreError::config("sdn token is required"));
        }
        if !self.allows_all_physnets() {
            if let Some(physnet) = self
                .bind_normal_ports_physnets
                .iter()
                .find(|p| !self.physical_networks.contains(p))
            {
                return Err(CoreError::config(format!(
                    "bind_normal_ports_physnets entry {physnet} is not in physical_networks"
                )));
            }
        }
        Ok(())
    }

    /// Whether every physnet is relayed.
    #[must_use]
    pub fn allows_all_physnets(&self) -> bool {
        self.physical_networks.iter().any(|p| p == ANY_PHYSNET)
    }

    /// Whether events on `physnet` are relayed.
    #[must_use]
    pub fn is_physnet_enabled(&self, physnet: &str) -> bool {
        self.allows_all_physnets() || self.physical_networks.iter().any(|p| p == physnet)
    }

    /// Get the HTTP timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Get the sync worker wake interval as a `Duration`.
    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }

    /// Get the maintenance interval as a `Duration`.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_seconds)
    }

    /// Completed-row retention, or `None` when completed rows are kept.
    #[must_use]
    pub fn completed_rows_retention(&self) -> Option<Duration> {
        u64::try_from(self.completed_rows_retention_seconds)
            .ok()
            .map(Duration::from_secs)
    }

    /// Get the processing timeout as a `Duration`.
    #[must_use]
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_seconds)
    }

    /// Retry budget per row.
    #[must_use]
    pub fn retry_limit(&self) -> RetryLimit {
        RetryLimit::from_config(self.retry_count)
    }
}

impl Default for SdnConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            url: String::new(),
            domain: Self::default_domain(),
            token: Self::default_token(),
            timeout_seconds: Self::default_timeout(),
            sync_timeout_seconds: Self::default_sync_timeout(),
            retry_count: Self::default_retry_count(),
            maintenance_interval_seconds: Self::default_maintenance_interval(),
            completed_rows_retention_seconds: Self::default_completed_rows_retention(),
            processing_timeout_seconds: Self::default_processing_timeout(),
            physical_networks: Self::default_physical_networks(),
            bind_normal_ports: false,
            bind_normal_ports_physnets: Vec::new(),
            cert_verify: false,
            cert_path: String::new(),
        }
    }
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SdnConfig::default();
        assert!(config.sync_enabled);
        assert_eq!(config.domain, "cloudx");
        assert_eq!(config.token, "abcdef");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.sync_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_limit(), RetryLimit::Unlimited);
        assert_eq!(config.maintenance_interval(), Duration::from_secs(300));
        assert_eq!(
            config.completed_rows_retention(),
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.processing_timeout(), Duration::from_secs(100));
        assert!(!config.cert_verify);
    }

    #[test]
    fn deserialize_fills_defaults() {
        let config: SdnConfig = serde_json::from_str(
            r#"{"url": "http://neo", "retry_count": 3, "completed_rows_retention_seconds": -1}"#,
        )
        .unwrap();
        assert_eq!(config.url, "http://neo");
        assert_eq!(config.retry_limit(), RetryLimit::Max(3));
        assert_eq!(config.completed_rows_retention(), None);
        assert_eq!(config.domain, "cloudx");
        assert!(config.allows_all_physnets());
    }

    #[test]
    fn validate_requires_url_and_token() {
        let mut config = SdnConfig::default();
        assert!(config.validate().is_err());

        config.url = "http://neo".to_string();
        assert!(config.validate().is_ok());

        config.token.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn normal_port_physnets_must_be_relayed() {
        let mut config = SdnConfig {
            url: "http://neo".to_string(),
            physical_networks: vec!["ib0".to_string()],
            bind_normal_ports_physnets: vec!["ib1".to_string()],
            ..SdnConfig::default()
        };
        assert!(config.validate().is_err());

        config.bind_normal_ports_physnets = vec!["ib0".to_string()];
        assert!(config.validate().is_ok());
        assert!(config.is_physnet_enabled("ib0"));
        assert!(!config.is_physnet_enabled("ib1"));
    }

    #[test]
    fn split_list_trims() {
        assert_eq!(split_list(" a, b,,c "), vec!["a", "b", "c"]);
    }
}
