//! Runtime configuration shared between the firmware and the host tests.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub max_connect_retries: u32,
    pub connect_timeout_secs: u32,

    // OTA settings
    pub ota_url: String,
    pub ota_start_delay_secs: u32,
    pub check_same_version: bool,
    pub check_downgrade: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            max_connect_retries: 5,
            connect_timeout_secs: 30,
            ota_url: String::new(),
            ota_start_delay_secs: 10,
            check_same_version: true,
            check_downgrade: true,
        }
    }
}

/// Malformed configuration; fatal at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    EmptySsid,
    BadOtaUrl,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptySsid => f.write_str("WiFi SSID is empty"),
            ConfigError::BadOtaUrl => f.write_str("OTA URL is missing or not http(s)"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wifi_ssid.is_empty() {
            return Err(ConfigError::EmptySsid);
        }
        if !(self.ota_url.starts_with("https://") || self.ota_url.starts_with("http://")) {
            return Err(ConfigError::BadOtaUrl);
        }
        Ok(())
    }
}
