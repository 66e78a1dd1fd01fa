// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Daemon configuration
//!
//! Defaults for the command-line options, optionally overridden by a
//! TOML configuration file:
//!
//! ```toml
//! num_devices = 2
//! ctl_device = "/dev/vhba_ctl"
//! audio_backend = "null"
//! bus = "session"
//! ```
//!
//! Command-line flags always win over the file.

use serde::Deserialize;

use crate::core::error::{DaemonError, Result};

/// Default kernel control device path
pub const DEFAULT_CTL_DEVICE: &str = "/dev/vhba_ctl";

/// Daemon configuration values
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Number of emulated devices
    pub num_devices: u32,
    /// Kernel control device path
    pub ctl_device: String,
    /// Audio backend identifier
    pub audio_backend: Option<String>,
    /// Backend-specific audio device
    pub audio_device: Option<String>,
    /// Bus type: "system" or "session"
    pub bus: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            ctl_device: DEFAULT_CTL_DEVICE.to_string(),
            audio_backend: None,
            audio_device: None,
            bus: "system".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Parse configuration from TOML text
    pub fn parse(data: &str) -> Result<Self> {
        toml::from_str(data)
            .map_err(|e| DaemonError::InvalidArgument(format!("config parse error: {}", e)))
    }

    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    /// Whether the configured bus is the system bus
    ///
    /// Unknown bus values fall back to the system bus with a warning.
    pub fn use_system_bus(&self) -> bool {
        match self.bus.to_ascii_lowercase().as_str() {
            "system" => true,
            "session" => false,
            other => {
                log::warn!("Invalid bus argument '{}', using default bus", other);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.num_devices, 1);
        assert_eq!(config.ctl_device, "/dev/vhba_ctl");
        assert!(config.use_system_bus());
    }

    #[test]
    fn test_parse_overrides() {
        let config = DaemonConfig::parse(
            r#"
            num_devices = 4
            ctl_device = "/dev/vhba_ctl0"
            audio_backend = "null"
            bus = "session"
            "#,
        )
        .unwrap();

        assert_eq!(config.num_devices, 4);
        assert_eq!(config.ctl_device, "/dev/vhba_ctl0");
        assert_eq!(config.audio_backend.as_deref(), Some("null"));
        assert!(!config.use_system_bus());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = DaemonConfig::parse("num_devices = 2").unwrap();
        assert_eq!(config.num_devices, 2);
        assert_eq!(config.ctl_device, DEFAULT_CTL_DEVICE);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(DaemonConfig::parse("bogus = 1").is_err());
    }

    #[test]
    fn test_invalid_bus_falls_back_to_system() {
        let config = DaemonConfig::parse(r#"bus = "dbus""#).unwrap();
        assert!(config.use_system_bus());
    }
}
