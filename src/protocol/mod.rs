// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol implementations for talking to smart plugs.
//!
//! Two transports are provided:
//!
//! - [`MqttConnection`]: a single shared connection to an MQTT broker that
//!   multiplexes any number of per-topic subscriptions.
//! - [`TapoSession`]: an authenticated HTTP session against a TP-Link Tapo
//!   device, exposing the handful of operations the backends need.

mod mqtt;
mod tapo;

pub use mqtt::{MessageCallback, MqttConnection, MqttConnectionBuilder, MqttConnectionConfig};
pub use tapo::{EnergyUsage, TapoSession};

// Re-exported so callers can choose delivery guarantees for `publish`
// without depending on rumqttc directly.
pub use rumqttc::QoS;
