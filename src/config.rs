//! Device configuration (§6 "Configuration").
//!
//! Programmatic construction only — no environment variable reads. An
//! embedder that wants file-backed config deserializes a `DeviceConfig`
//! from YAML/JSON itself via `serde`, the same load-then-validate split the
//! teacher's `dsl-core::config::loader` uses.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub prefix: String,
    pub mcast_addr: Option<IpAddr>,
    pub mcast_port: u16,
    pub data_port: Option<u16>,
    pub link_timeout: Duration,
    pub num_signal_groups: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            prefix: "dev".into(),
            mcast_addr: Some("224.0.1.3".parse().unwrap()),
            mcast_port: 7570,
            data_port: None,
            link_timeout: Duration::from_secs(30),
            num_signal_groups: 1,
        }
    }
}

impl DeviceConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        DeviceConfig { prefix: prefix.into(), ..Default::default() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.num_signal_groups == 0 {
            return Err(ConfigError::NoSignalGroups);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let cfg = DeviceConfig::new("");
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyPrefix));
    }

    #[test]
    fn zero_signal_groups_is_rejected() {
        let mut cfg = DeviceConfig::new("node");
        cfg.num_signal_groups = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::NoSignalGroups));
    }
}
