// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `plugwatch` - watch smart plug power draw and switch idle devices off.
//!
//! This crate monitors the power draw and on/off status of smart plugs and
//! autonomously turns a plug off once it has drawn less than a configured
//! threshold for a sustained period, optionally notifying a Discord channel
//! on transitions.
//!
//! # Backends
//!
//! Each plug is driven by one of two backends:
//!
//! - **Tapo**: polls a TP-Link Tapo device directly over its authenticated
//!   HTTP session, recovering transparently from silent session expiry.
//! - **MQTT**: subscribes to `{prefix}/status` and `{prefix}/power` topics on
//!   a shared broker connection and serves the latest received values.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use plugwatch::{DiscordNotifier, IntelligentPlug, PowerSavingPlug, TapoBackend};
//! use plugwatch::config::TapoCredentials;
//!
//! #[tokio::main]
//! async fn main() -> plugwatch::Result<()> {
//!     let credentials = TapoCredentials::from_env()?;
//!     let backend = TapoBackend::new("192.168.1.20", &credentials)?;
//!     let notifier = Arc::new(DiscordNotifier::from_env());
//!
//!     let mut washer = PowerSavingPlug::new(
//!         "washer",
//!         Box::new(backend),
//!         notifier,
//!         5.0,
//!         Duration::from_secs(120),
//!     );
//!
//!     loop {
//!         if let Err(error) = washer.update().await {
//!             eprintln!("update failed: {error}");
//!         }
//!         tokio::time::sleep(Duration::from_secs(30)).await;
//!     }
//! }
//! ```
//!
//! # Shared MQTT Connection
//!
//! MQTT-backed plugs share one broker connection, created once at startup
//! and injected into each backend:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use plugwatch::{MqttBackend, MqttConnection};
//!
//! # async fn example() -> plugwatch::Result<()> {
//! let connection = Arc::new(
//!     MqttConnection::builder()
//!         .host("192.168.1.50")
//!         .build()
//!         .await?,
//! );
//!
//! let backend = MqttBackend::new(Arc::clone(&connection), "washer").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod notify;
pub mod plug;
pub mod protocol;

pub use backend::{MqttBackend, PlugBackend, TapoBackend, build_backend};
pub use config::{Config, PlugConfig};
pub use error::{ConfigError, Error, ParseError, ProtocolError, Result};
pub use notify::{DiscordNotifier, Notifier};
pub use plug::{IntelligentPlug, PowerNotifyingPlug, PowerSavingPlug};
pub use protocol::{MqttConnection, MqttConnectionBuilder, TapoSession};
