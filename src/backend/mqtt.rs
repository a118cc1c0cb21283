// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus-telemetry backend fed by MQTT messages.
//!
//! Instead of polling the device, this backend subscribes to two topics
//! derived from a configured prefix, `{prefix}/status` and `{prefix}/power`,
//! and serves whatever values arrived last. Telemetry arrival is
//! asynchronous and unordered relative to construction, so reads fail with a
//! not-ready error until the first value has been seen on the respective
//! topic; [`wait_until_ready`](crate::backend::PlugBackend::wait_until_ready)
//! gates startup on both topics having delivered once.
//!
//! Status commands are published retained with exactly-once delivery, so the
//! broker redelivers the last command to late-joining subscribers. The
//! command is fire-and-forget: the cached status changes only when the
//! device (or the retained echo) publishes on the status topic.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::backend::PlugBackend;
use crate::error::{Error, ParseError, Result};
use crate::protocol::{MqttConnection, QoS};

/// Telemetry values cached from the bus, shared with the dispatch callbacks.
#[derive(Default)]
struct TelemetryCache {
    /// Last received on/off status; `None` until the first status message.
    status: Mutex<Option<bool>>,
    /// Last received power reading in watts; `None` until the first message.
    power: Mutex<Option<f64>>,
    /// Woken whenever either field is written.
    changed: Notify,
}

impl TelemetryCache {
    fn is_ready(&self) -> bool {
        self.status.lock().is_some() && self.power.lock().is_some()
    }
}

/// Backend that serves cached telemetry from a shared MQTT connection.
pub struct MqttBackend {
    connection: Arc<MqttConnection>,
    status_topic: String,
    power_topic: String,
    cache: Arc<TelemetryCache>,
}

impl MqttBackend {
    /// Creates the backend and registers its two telemetry subscriptions.
    ///
    /// # Errors
    ///
    /// Returns error if either subscription cannot be registered.
    pub async fn new(connection: Arc<MqttConnection>, topic_prefix: &str) -> Result<Self> {
        let status_topic = format!("{topic_prefix}/status");
        let power_topic = format!("{topic_prefix}/power");
        let cache = Arc::new(TelemetryCache::default());

        let status_cache = Arc::clone(&cache);
        connection
            .subscribe(status_topic.as_str(), move |_topic, payload| {
                *status_cache.status.lock() = Some(payload == "1");
                status_cache.changed.notify_waiters();
                Ok(())
            })
            .await?;

        let power_cache = Arc::clone(&cache);
        connection
            .subscribe(power_topic.as_str(), move |_topic, payload| {
                let watts: f64 =
                    payload
                        .trim()
                        .parse()
                        .map_err(|error: std::num::ParseFloatError| ParseError::InvalidPower {
                            payload: payload.to_string(),
                            message: error.to_string(),
                        })?;
                *power_cache.power.lock() = Some(watts);
                power_cache.changed.notify_waiters();
                Ok(())
            })
            .await?;

        Ok(Self {
            connection,
            status_topic,
            power_topic,
            cache,
        })
    }

    fn not_ready(&self, topic: &str) -> Error {
        Error::TelemetryNotReady {
            topic: topic.to_string(),
        }
    }
}

#[async_trait]
impl PlugBackend for MqttBackend {
    async fn power(&self) -> Result<f64> {
        (*self.cache.power.lock()).ok_or_else(|| self.not_ready(&self.power_topic))
    }

    async fn status(&self) -> Result<bool> {
        (*self.cache.status.lock()).ok_or_else(|| self.not_ready(&self.status_topic))
    }

    async fn set_status(&self, on: bool) -> Result<()> {
        let payload = if on { "1" } else { "0" };
        self.connection
            .publish(&self.status_topic, payload, QoS::ExactlyOnce, true)
            .await?;
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<()> {
        loop {
            // Register for the wake-up before checking, so a write between
            // the check and the await cannot be missed.
            let changed = self.cache.changed.notified();
            if self.cache.is_ready() {
                return Ok(());
            }
            changed.await;
        }
    }
}

impl std::fmt::Debug for MqttBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBackend")
            .field("status_topic", &self.status_topic)
            .field("power_topic", &self.power_topic)
            .field("ready", &self.cache.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn backend_with_connection() -> (Arc<MqttConnection>, MqttBackend, rumqttc::EventLoop) {
        let (connection, event_loop) = MqttConnection::offline();
        let connection = Arc::new(connection);
        let backend = MqttBackend::new(Arc::clone(&connection), "washer")
            .await
            .unwrap();
        (connection, backend, event_loop)
    }

    #[tokio::test]
    async fn reads_fail_before_any_telemetry() {
        let (_connection, backend, _event_loop) = backend_with_connection().await;

        assert!(matches!(
            backend.power().await.unwrap_err(),
            Error::TelemetryNotReady { topic } if topic == "washer/power"
        ));
        assert!(matches!(
            backend.status().await.unwrap_err(),
            Error::TelemetryNotReady { topic } if topic == "washer/status"
        ));
    }

    #[tokio::test]
    async fn each_topic_becomes_ready_independently() {
        let (connection, backend, _event_loop) = backend_with_connection().await;

        connection.dispatch("washer/power", "12.5");
        assert!((backend.power().await.unwrap() - 12.5).abs() < f64::EPSILON);
        assert!(backend.status().await.is_err());

        connection.dispatch("washer/status", "1");
        assert!(backend.status().await.unwrap());
    }

    #[tokio::test]
    async fn status_payload_decoding() {
        let (connection, backend, _event_loop) = backend_with_connection().await;

        connection.dispatch("washer/status", "1");
        assert!(backend.status().await.unwrap());

        connection.dispatch("washer/status", "0");
        assert!(!backend.status().await.unwrap());

        // Anything that is not exactly "1" decodes to off.
        connection.dispatch("washer/status", "on");
        assert!(!backend.status().await.unwrap());
    }

    #[tokio::test]
    async fn malformed_power_payload_leaves_cache_unchanged() {
        let (connection, backend, _event_loop) = backend_with_connection().await;

        connection.dispatch("washer/power", "watts");
        assert!(backend.power().await.is_err());

        connection.dispatch("washer/power", "3.5");
        connection.dispatch("washer/power", "not a number");
        assert!((backend.power().await.unwrap() - 3.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn wait_until_ready_wakes_after_both_topics() {
        let (connection, backend, _event_loop) = backend_with_connection().await;
        let backend = Arc::new(backend);

        let waiter = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.wait_until_ready().await })
        };
        tokio::task::yield_now().await;

        connection.dispatch("washer/status", "1");
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        connection.dispatch("washer/power", "8.0");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_until_ready did not wake")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_until_ready_returns_immediately_when_ready() {
        let (connection, backend, _event_loop) = backend_with_connection().await;

        connection.dispatch("washer/status", "0");
        connection.dispatch("washer/power", "0.0");

        tokio::time::timeout(Duration::from_secs(1), backend.wait_until_ready())
            .await
            .expect("wait_until_ready blocked despite telemetry")
            .unwrap();
    }

    #[tokio::test]
    async fn latest_value_wins() {
        let (connection, backend, _event_loop) = backend_with_connection().await;

        connection.dispatch("washer/power", "100.0");
        connection.dispatch("washer/power", "2.25");
        assert!((backend.power().await.unwrap() - 2.25).abs() < f64::EPSILON);
    }
}
