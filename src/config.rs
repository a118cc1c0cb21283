// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration loading.
//!
//! Plugs are configured in a YAML file with two top-level sections, each a
//! map of plug name to settings:
//!
//! ```yaml
//! power-save-plugs:
//!   washer:
//!     type: tapo
//!     address: 192.168.1.20
//!     power-threshold: 5
//!     max-low-power-time: 120
//!
//! power-notify-plugs:
//!   printer:
//!     type: mqtt
//!     topic: printer
//!     power-threshold: 3
//!     max-low-power-time: 60
//! ```
//!
//! Credentials and addresses of shared services come from the environment:
//! `TP_LINK_EMAIL`/`TP_LINK_PASSWORD` for Tapo devices,
//! `MQTT_BROKER_ADDRESS`/`MQTT_BROKER_PORT` for the broker connection, and
//! `DISCORD_WEBHOOK_URL` for notifications.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// The daemon's plug configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Plugs that are switched off after sustained low power draw.
    #[serde(default, rename = "power-save-plugs")]
    pub power_save_plugs: BTreeMap<String, PlugConfig>,

    /// Plugs whose device transitions are only reported.
    #[serde(default, rename = "power-notify-plugs")]
    pub power_notify_plugs: BTreeMap<String, PlugConfig>,
}

/// Settings for one configured plug.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlugConfig {
    /// Backend type: `tapo` (default) or `mqtt`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Device address; required for `tapo` plugs.
    #[serde(default)]
    pub address: Option<String>,

    /// Telemetry topic prefix; required for `mqtt` plugs.
    #[serde(default)]
    pub topic: Option<String>,

    /// Power threshold in watts below which draw counts as low.
    pub power_threshold: f64,

    /// Seconds of sustained low power before the plug acts.
    pub max_low_power_time: f64,

    /// Whether transitions are delivered to the external notifier.
    /// When false, transitions are only written to the log.
    #[serde(default = "default_notify")]
    pub notify: bool,
}

fn default_notify() -> bool {
    true
}

impl PlugConfig {
    /// Returns the configured low-power duration.
    #[must_use]
    pub fn max_low_power_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_low_power_time)
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parses configuration from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid YAML for this schema.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Returns the total number of configured plugs.
    #[must_use]
    pub fn plug_count(&self) -> usize {
        self.power_save_plugs.len() + self.power_notify_plugs.len()
    }
}

/// TP-Link cloud account credentials used by Tapo devices.
#[derive(Debug, Clone)]
pub struct TapoCredentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl TapoCredentials {
    /// Creates credentials from explicit values.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Reads credentials from `TP_LINK_EMAIL` and `TP_LINK_PASSWORD`.
    ///
    /// # Errors
    ///
    /// Returns error if either variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let email = std::env::var("TP_LINK_EMAIL")
            .map_err(|_| ConfigError::MissingEnvVar("TP_LINK_EMAIL"))?;
        let password = std::env::var("TP_LINK_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("TP_LINK_PASSWORD"))?;
        Ok(Self::new(email, password))
    }
}
