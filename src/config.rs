// config.rs - Probe Configuration
// Purpose: Concurrency, timeouts and request headers shared by every probe.
//          Built once before fan-out and handed to each probe by value.

use crate::errors::SetupError;
use std::time::Duration;

/// Storage REST API version sent as `x-ms-version` (first version with blob versioning)
pub const STORAGE_API_VERSION: &str = "2019-12-12";

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Maximum probes in flight at once
    pub concurrency: usize,
    /// DNS lookup timeout in seconds
    pub dns_timeout_secs: u64,
    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub accept_language: String,
    pub storage_api_version: String,
    /// Print every failure and keep raw DNS diagnostics
    pub verbose: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            dns_timeout_secs: 2,
            http_timeout_secs: 30,
            user_agent: default_user_agent(),
            accept_language: "en-US,en;q=0.9".to_string(),
            storage_api_version: STORAGE_API_VERSION.to_string(),
            verbose: false,
        }
    }
}

impl ProbeConfig {
    /// Wider window and shorter timeouts for large wordlists
    pub fn aggressive() -> Self {
        Self {
            concurrency: 50,
            dns_timeout_secs: 1,
            http_timeout_secs: 15,
            ..Self::default()
        }
    }

    /// Small window for fragile resolvers or rate-limited targets
    pub fn respectful() -> Self {
        Self {
            concurrency: 4,
            dns_timeout_secs: 5,
            http_timeout_secs: 45,
            ..Self::default()
        }
    }

    /// Resolve a named preset
    pub fn from_profile(name: &str) -> Result<Self, SetupError> {
        match name {
            "default" => Ok(Self::default()),
            "aggressive" => Ok(Self::aggressive()),
            "respectful" => Ok(Self::respectful()),
            other => Err(SetupError::InvalidConfig(format!(
                "unknown profile '{}' (expected default, aggressive or respectful)",
                other
            ))),
        }
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.concurrency == 0 {
            return Err(SetupError::InvalidConfig("concurrency must be at least 1".into()));
        }
        if self.dns_timeout_secs == 0 || self.http_timeout_secs == 0 {
            return Err(SetupError::InvalidConfig("timeouts must be at least 1 second".into()));
        }
        if self.storage_api_version.trim().is_empty() {
            return Err(SetupError::InvalidConfig("storage API version is empty".into()));
        }
        Ok(())
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.storage_api_version, "2019-12-12");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_aggressive_config() {
        let config = ProbeConfig::aggressive();
        assert!(config.concurrency > ProbeConfig::default().concurrency);
        assert!(config.dns_timeout() <= ProbeConfig::default().dns_timeout());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = ProbeConfig {
            concurrency: 0,
            ..ProbeConfig::default()
        };
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_profile() {
        assert!(ProbeConfig::from_profile("respectful").is_ok());
        assert!(ProbeConfig::from_profile("turbo").is_err());
    }
}
