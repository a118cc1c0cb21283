// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for `plugwatch`.
//!
//! This module provides the error hierarchy for failures across the crate:
//! protocol communication, payload parsing, and configuration loading.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during protocol communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a payload or response.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error occurred while loading configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A telemetry-backed value was read before any message arrived.
    #[error("no telemetry received yet on {topic}")]
    TelemetryNotReady {
        /// The topic on which no message has been received.
        topic: String,
    },
}

/// Errors related to protocol communication (device HTTP session or MQTT).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT connection or communication failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker or device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Authentication with the device was rejected.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The device session has expired and must be re-established.
    #[error("device session expired")]
    SessionExpired,

    /// An operation was attempted without an established session.
    #[error("no session established")]
    SessionNotEstablished,

    /// The device rejected the request with a protocol error code.
    #[error("device returned error code {0}")]
    Device(i32),
}

/// Errors related to parsing payloads and device responses.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the response.
    #[error("missing field in response: {0}")]
    MissingField(String),

    /// A power telemetry payload was not a valid watt value.
    #[error("invalid power payload {payload:?}: {message}")]
    InvalidPower {
        /// The raw payload that failed to parse.
        payload: String,
        /// Description of the parsing failure.
        message: String,
    },
}

/// Errors related to configuration loading.
///
/// These are fatal at startup: the daemon refuses to enter its polling loop
/// with an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configured plug type is not recognized.
    #[error("unknown plug type {0:?}")]
    UnknownPlugType(String),

    /// A plug entry is missing a required field.
    #[error("plug {plug:?} is missing required field {field:?}")]
    MissingField {
        /// The plug entry name.
        plug: String,
        /// The missing field.
        field: &'static str,
    },

    /// A required environment variable is not set.
    #[error("environment variable {0} must be set")]
    MissingEnvVar(&'static str),

    /// A plug requires an MQTT connection but none was configured.
    #[error("'mqtt' plugs require MQTT_BROKER_ADDRESS to be set")]
    NoMqttConnection,

    /// Reading the configuration file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The configuration file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML.
    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
