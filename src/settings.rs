// src/settings.rs
//
// Bridge configuration, read once at startup from a JSON file:
//
// {
//   "analyzer": { "port": "/dev/ttyUSB0", "dialect": "astm" },
//   "lims": { "url": "http://lims.local/api/results", "username": "bridge", "password": "..." },
//   "log_dir": "/var/log/aia360-bridge"
// }

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::BridgeError;
use crate::io::serial::{Parity, SerialProfile};
use crate::protocol::Dialect;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub port: String,
    #[serde(default)]
    pub dialect: Dialect,
    /// Overrides the dialect's wire rate when set
    #[serde(default)]
    pub baud_rate: Option<u32>,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LimsSettings {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    pub analyzer: AnalyzerSettings,
    pub lims: LimsSettings,
    /// Mirror log output to a timestamped file in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_timeout_secs() -> u64 {
    30
}

impl AnalyzerSettings {
    pub fn effective_baud_rate(&self) -> u32 {
        self.baud_rate
            .unwrap_or_else(|| self.dialect.default_baud_rate())
    }

    pub fn serial_profile(&self) -> SerialProfile {
        SerialProfile {
            port: self.port.clone(),
            baud_rate: self.effective_baud_rate(),
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }
}

impl BridgeSettings {
    fn validate(&self) -> Result<(), BridgeError> {
        if self.analyzer.port.trim().is_empty() {
            return Err(BridgeError::config("analyzer.port must not be empty"));
        }
        if !(5..=8).contains(&self.analyzer.data_bits) {
            return Err(BridgeError::config(format!(
                "analyzer.data_bits must be 5-8, got {}",
                self.analyzer.data_bits
            )));
        }
        if !matches!(self.analyzer.stop_bits, 1 | 2) {
            return Err(BridgeError::config(format!(
                "analyzer.stop_bits must be 1 or 2, got {}",
                self.analyzer.stop_bits
            )));
        }
        if self.analyzer.baud_rate == Some(0) {
            return Err(BridgeError::config("analyzer.baud_rate must be positive"));
        }
        if self.lims.url.trim().is_empty() {
            return Err(BridgeError::config("lims.url must not be empty"));
        }
        if self.lims.timeout_secs == 0 {
            return Err(BridgeError::config("lims.timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// Parse and validate settings from JSON text.
pub fn parse_settings(text: &str) -> Result<BridgeSettings, BridgeError> {
    let settings: BridgeSettings = serde_json::from_str(text)
        .map_err(|e| BridgeError::config(format!("Failed to parse settings: {}", e)))?;
    settings.validate()?;
    Ok(settings)
}

pub fn load_settings(path: &Path) -> Result<BridgeSettings, BridgeError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_settings(&text)
}
