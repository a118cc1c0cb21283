// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared MQTT connection with per-topic callback multiplexing.
//!
//! A [`MqttConnection`] owns one physical connection to an MQTT broker and
//! fans incoming messages out to any number of logical subscriptions. Each
//! subscription pairs an exact topic with a callback; all callbacks registered
//! for a topic receive every message published on it, in registration order.
//!
//! # Architecture
//!
//! ```text
//! broker ──► event loop task ──► dispatch(topic, payload)
//!                                      │
//!                        subscriptions[topic] = [cb1, cb2, ...]
//!                                      │
//!                        cb1(topic, payload); cb2(topic, payload); ...
//! ```
//!
//! The event loop task also re-issues every live subscription whenever the
//! broker acknowledges a (re)connection, so subscriptions survive connection
//! drops transparently.
//!
//! # Examples
//!
//! ```no_run
//! use plugwatch::protocol::{MqttConnection, QoS};
//!
//! # async fn example() -> plugwatch::Result<()> {
//! let connection = MqttConnection::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .build()
//!     .await?;
//!
//! connection
//!     .subscribe("washer/power", |_topic, payload| {
//!         println!("power reading: {payload} W");
//!         Ok(())
//!     })
//!     .await?;
//!
//! connection.publish("washer/status", "1", QoS::ExactlyOnce, true).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::oneshot;

use crate::error::ProtocolError;

/// Global counter for generating unique client IDs.
static CONNECTION_CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Delay before polling again after an event loop error, to avoid a hot
/// reconnect loop while the broker is unreachable.
const RECONNECT_POLL_DELAY: Duration = Duration::from_secs(2);

/// A callback invoked with the topic and UTF-8 payload of an inbound message.
///
/// A callback returning an error does not affect the other callbacks
/// registered for the topic; the error is logged and dispatch continues.
pub type MessageCallback = Arc<dyn Fn(&str, &str) -> crate::Result<()> + Send + Sync>;

/// Configuration for an MQTT connection.
#[derive(Debug, Clone)]
pub struct MqttConnectionConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
}

impl Default for MqttConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

/// A shared MQTT connection that multiplexes per-topic subscriptions.
///
/// `MqttConnection` is cheaply cloneable (via `Arc`) and is intended to be
/// created once at startup and injected into every component that needs the
/// broker, rather than accessed through global state.
#[derive(Clone)]
pub struct MqttConnection {
    inner: Arc<MqttConnectionInner>,
}

struct MqttConnectionInner {
    /// The MQTT async client for publishing and subscribing.
    client: AsyncClient,
    /// Registered callbacks by exact topic. Callbacks fire in registration
    /// order within a topic.
    subscriptions: RwLock<HashMap<String, Vec<MessageCallback>>>,
    /// Configuration used for this connection.
    config: MqttConnectionConfig,
    /// Connection status.
    connected: AtomicBool,
    /// Set by `disconnect` so the event loop stops instead of reconnecting.
    closing: AtomicBool,
}

impl MqttConnection {
    /// Creates a new builder for configuring an MQTT connection.
    #[must_use]
    pub fn builder() -> MqttConnectionBuilder {
        MqttConnectionBuilder::default()
    }

    /// Returns whether the connection is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the number of topics with at least one registered callback.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Registers a callback for a topic.
    ///
    /// The first callback registered for a topic issues a live subscribe to
    /// the broker; further callbacks on the same topic share that
    /// subscription. All callbacks for a topic receive every message, in
    /// registration order.
    ///
    /// # Errors
    ///
    /// Returns error if the live MQTT subscribe fails.
    pub async fn subscribe<F>(
        &self,
        topic: impl Into<String>,
        callback: F,
    ) -> Result<(), ProtocolError>
    where
        F: Fn(&str, &str) -> crate::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let first_for_topic = {
            let mut subscriptions = self.inner.subscriptions.write();
            let callbacks = subscriptions.entry(topic.clone()).or_default();
            callbacks.push(Arc::new(callback));
            callbacks.len() == 1
        };

        if first_for_topic {
            tracing::debug!(topic = %topic, "Subscribing to topic");
            self.inner
                .client
                .subscribe(&topic, QoS::AtLeastOnce)
                .await
                .map_err(ProtocolError::Mqtt)?;
        }

        Ok(())
    }

    /// Publishes a message.
    ///
    /// The delivery guarantee and retain flag are passed through to the
    /// broker unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if the publish cannot be queued.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        tracing::debug!(topic = %topic, payload = %payload, retain, "Publishing message");
        self.inner
            .client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(ProtocolError::Mqtt)
    }

    /// Disconnects from the broker and stops the event loop.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect operation fails.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );
        self.inner.closing.store(true, Ordering::Release);
        self.inner
            .client
            .disconnect()
            .await
            .map_err(ProtocolError::Mqtt)?;
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }

    /// Dispatches an inbound message to the callbacks registered for its
    /// topic.
    ///
    /// Messages on topics without registered callbacks are dropped silently.
    /// A failing callback is logged and does not stop the remaining
    /// callbacks.
    pub(crate) fn dispatch(&self, topic: &str, payload: &str) {
        // Clone the callback list out of the lock so a callback registering
        // further subscriptions cannot deadlock against dispatch.
        let callbacks: Vec<MessageCallback> = {
            let subscriptions = self.inner.subscriptions.read();
            match subscriptions.get(topic) {
                Some(callbacks) => callbacks.clone(),
                None => {
                    tracing::trace!(topic = %topic, "No subscription for topic, dropping message");
                    return;
                }
            }
        };

        for callback in callbacks {
            if let Err(error) = callback(topic, payload) {
                tracing::warn!(topic = %topic, error = %error, "Subscription callback failed");
            }
        }
    }

    /// Re-issues a live subscribe for every registered topic.
    ///
    /// Called from the event loop whenever the broker acknowledges a
    /// connection, so subscriptions are recovered after a drop.
    async fn resubscribe_all(&self) {
        let topics: Vec<String> = self.inner.subscriptions.read().keys().cloned().collect();
        for topic in topics {
            if let Err(error) = self.inner.client.subscribe(&topic, QoS::AtLeastOnce).await {
                tracing::warn!(topic = %topic, error = %error, "Failed to resubscribe");
            }
        }
    }

    /// Creates a connection that is not backed by a running event loop.
    ///
    /// Subscribes and publishes are queued into the client's request channel
    /// but never sent; `dispatch` can be driven directly. The returned event
    /// loop must be kept alive so queued requests are accepted.
    #[cfg(test)]
    pub(crate) fn offline() -> (Self, EventLoop) {
        let options = MqttOptions::new("plugwatch_test", "127.0.0.1", 1883);
        let (client, event_loop) = AsyncClient::new(options, 64);
        let connection = Self {
            inner: Arc::new(MqttConnectionInner {
                client,
                subscriptions: RwLock::new(HashMap::new()),
                config: MqttConnectionConfig::default(),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        };
        (connection, event_loop)
    }
}

impl std::fmt::Debug for MqttConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConnection")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for creating an MQTT connection.
///
/// # Examples
///
/// ```no_run
/// use plugwatch::protocol::MqttConnection;
/// use std::time::Duration;
///
/// # async fn example() -> plugwatch::Result<()> {
/// let connection = MqttConnection::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .credentials("user", "password")
///     .keep_alive(Duration::from_secs(60))
///     .connection_timeout(Duration::from_secs(5))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttConnectionBuilder {
    config: MqttConnectionConfig,
}

impl MqttConnectionBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Builds the connection, connects, and spawns the event loop task.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn build(self) -> Result<MqttConnection, ProtocolError> {
        if self.config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let counter = CONNECTION_CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("plugwatch_{}_{}", std::process::id(), counter);

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        let connection = MqttConnection {
            inner: Arc::new(MqttConnectionInner {
                client,
                subscriptions: RwLock::new(HashMap::new()),
                config: self.config.clone(),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        };

        // Channel to signal when the first ConnAck is received
        let (connack_tx, connack_rx) = oneshot::channel();

        let connection_clone = connection.clone();
        tokio::spawn(async move {
            handle_connection_events(event_loop, connection_clone, Some(connack_tx)).await;
        });

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    "Connected to MQTT broker"
                );
            }
            Ok(Err(_)) => {
                return Err(ProtocolError::ConnectionFailed(
                    "MQTT event loop terminated unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                return Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )));
            }
        }

        Ok(connection)
    }
}

/// Handles MQTT events for the shared connection.
///
/// Keeps polling after transport errors so rumqttc reconnects on the next
/// poll; stops only once `disconnect` has been requested.
async fn handle_connection_events(
    mut event_loop: EventLoop,
    connection: MqttConnection,
    connack_tx: Option<oneshot::Sender<()>>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = connack_tx;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT connection acknowledged");
                connection.inner.connected.store(true, Ordering::Release);
                connection.resubscribe_all().await;
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => {
                        tracing::trace!(
                            topic = %publish.topic,
                            payload = %payload,
                            "MQTT message received"
                        );
                        connection.dispatch(&publish.topic, &payload);
                    }
                    Err(_) => {
                        tracing::warn!(topic = %publish.topic, "Ignoring non-UTF-8 payload");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker requested disconnect");
                connection.inner.connected.store(false, Ordering::Release);
            }
            Ok(_) => {}
            Err(error) => {
                connection.inner.connected.store(false, Ordering::Release);
                if connection.inner.closing.load(Ordering::Acquire) {
                    tracing::debug!("MQTT event loop stopped");
                    break;
                }
                tracing::error!(error = %error, "MQTT event loop error, will reconnect");
                tokio::time::sleep(RECONNECT_POLL_DELAY).await;
            }
        }
    }
}
