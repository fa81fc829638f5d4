//! Connection settings
//!
//! Resolves the device path and baud rate from command-line flags and an
//! optional TOML file:
//!
//! ```toml
//! port = "/dev/cu.usbmodemfa131"
//! baud_rate = 115200
//! ```
//!
//! Flags win over the file. Timing is fixed and not configurable here.

use crate::serial::port::DEFAULT_BAUD;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Contents of a settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Serial device path
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        Self::parse_content(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// Parse settings from TOML text
    pub fn parse_content(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path` when given, otherwise defaults
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides
    pub fn merge(mut self, port: Option<String>, baud_rate: Option<u32>) -> Self {
        if port.is_some() {
            self.port = port;
        }
        if let Some(baud) = baud_rate {
            self.baud_rate = baud;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, None);
        assert_eq!(settings.baud_rate, 115200);
    }

    #[test]
    fn test_parse_full() {
        let settings =
            Settings::parse_content("port = \"/dev/ttyACM0\"\nbaud_rate = 57600\n").unwrap();
        assert_eq!(settings.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(settings.baud_rate, 57600);
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        assert_eq!(Settings::parse_content("").unwrap(), Settings::default());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(Settings::parse_content("interval_ms = 100\n").is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let file = Settings {
            port: Some("/dev/ttyUSB0".to_string()),
            baud_rate: 9600,
        };

        let merged = file.clone().merge(Some("/dev/ttyUSB1".to_string()), None);
        assert_eq!(merged.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(merged.baud_rate, 9600);

        let merged = file.merge(None, Some(115200));
        assert_eq!(merged.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(merged.baud_rate, 115200);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port = \"/dev/cu.usbmodemfa131\"").unwrap();

        let settings = Settings::load_optional(Some(file.path())).unwrap();
        assert_eq!(settings.port.as_deref(), Some("/dev/cu.usbmodemfa131"));
        assert_eq!(settings.baud_rate, 115200);
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");

        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains("tally.toml"));
    }
}
