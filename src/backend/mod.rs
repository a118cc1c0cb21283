// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Monitoring backends: sources of power/status truth for one plug.
//!
//! A [`PlugBackend`] answers three questions about a single smart plug: how
//! much power is it drawing, is it on, and can it be switched. Two
//! implementations exist:
//!
//! - [`TapoBackend`]: polls a TP-Link Tapo device directly over its
//!   authenticated HTTP session, transparently re-authenticating once when a
//!   call fails.
//! - [`MqttBackend`]: subscribes to status and power telemetry topics on a
//!   shared [`MqttConnection`](crate::protocol::MqttConnection) and serves the
//!   most recently received values.
//!
//! Backends are selected per plug from configuration by [`build_backend`].

mod mqtt;
mod tapo;

pub use mqtt::MqttBackend;
pub use tapo::TapoBackend;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{PlugConfig, TapoCredentials};
use crate::error::{ConfigError, Result};
use crate::protocol::MqttConnection;

/// A source of power/status truth and sink for status commands for one plug.
#[async_trait]
pub trait PlugBackend: Send + Sync {
    /// Returns the plug's current power draw in watts.
    async fn power(&self) -> Result<f64>;

    /// Returns whether the plug is on.
    async fn status(&self) -> Result<bool>;

    /// Switches the plug on or off.
    async fn set_status(&self, on: bool) -> Result<()>;

    /// Blocks until the backend can answer reads.
    ///
    /// Backends that perform live round-trips are ready immediately; the
    /// telemetry-fed backend waits until it has observed at least one value
    /// per topic.
    async fn wait_until_ready(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds the backend described by a plug's configuration.
///
/// The plug type defaults to `tapo` when unset. `mqtt` plugs require the
/// shared broker connection created at startup.
///
/// # Errors
///
/// Returns error if the configuration names an unknown plug type, is missing
/// a required field, or requires resources (credentials, broker connection)
/// that are unavailable.
pub async fn build_backend(
    name: &str,
    config: &PlugConfig,
    mqtt: Option<&Arc<MqttConnection>>,
) -> Result<Box<dyn PlugBackend>> {
    match config.kind.as_deref().unwrap_or("tapo") {
        "tapo" => {
            let address = config
                .address
                .as_deref()
                .ok_or_else(|| ConfigError::MissingField {
                    plug: name.to_string(),
                    field: "address",
                })?;
            let credentials = TapoCredentials::from_env()?;
            Ok(Box::new(TapoBackend::new(address, &credentials)?))
        }
        "mqtt" => {
            let prefix = config
                .topic
                .as_deref()
                .ok_or_else(|| ConfigError::MissingField {
                    plug: name.to_string(),
                    field: "topic",
                })?;
            let connection = mqtt.ok_or(ConfigError::NoMqttConnection)?;
            Ok(Box::new(
                MqttBackend::new(Arc::clone(connection), prefix).await?,
            ))
        }
        other => Err(ConfigError::UnknownPlugType(other.to_string()).into()),
    }
}
