// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authenticated HTTP session for TP-Link Tapo smart plugs.
//!
//! Tapo devices speak a JSON envelope over HTTP: every request is a POST to
//! `/app` with a `method` and optional `params`, and every response carries an
//! `error_code` (zero on success) and an optional `result`. Talking to a
//! device requires a session: a `handshake` call that yields a session cookie,
//! followed by a `login_device` call that exchanges the account credentials
//! for a request token.
//!
//! Sessions expire silently on the device side. [`TapoSession`] does not
//! recover from that by itself; callers are expected to [`reset`] the session
//! and run the handshake/login sequence again (see
//! [`TapoBackend`](crate::backend::TapoBackend)).
//!
//! [`reset`]: TapoSession::reset

use std::time::Duration;

use reqwest::{Client, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, ParseError, ProtocolError};

/// Default request timeout for device round-trips.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error code the device reports when the session token is no longer valid.
const CODE_SESSION_EXPIRED: i32 = 9999;

/// Error code the device reports for rejected credentials.
const CODE_INVALID_CREDENTIALS: i32 = -1501;

/// An authenticated session against a single Tapo device.
///
/// Created once per device and reused for its lifetime; all operations share
/// the session state established by [`handshake`](Self::handshake) and
/// [`login`](Self::login).
#[derive(Debug)]
pub struct TapoSession {
    client: Client,
    base_url: String,
    email: String,
    password: String,
    session: Option<SessionState>,
}

/// Session state established by handshake and login.
#[derive(Debug)]
struct SessionState {
    /// Session cookie returned by the handshake.
    cookie: String,
    /// Request token returned by login; absent between handshake and login.
    token: Option<String>,
}

/// Current energy usage as reported by the device.
#[derive(Debug, Clone, Deserialize)]
pub struct EnergyUsage {
    /// Instantaneous power draw in milliwatts.
    pub current_power: u32,
}

/// Device information subset used for status queries.
#[derive(Debug, Deserialize)]
struct DeviceInfo {
    device_on: bool,
}

/// Result payload of a `login_device` call.
#[derive(Debug, Deserialize)]
struct LoginResult {
    token: String,
}

/// The JSON envelope every Tapo response is wrapped in.
#[derive(Debug, Deserialize)]
struct DeviceResponse<T> {
    error_code: i32,
    result: Option<T>,
}

impl TapoSession {
    /// Creates a session for the device at `address`.
    ///
    /// No network traffic happens here; the session is established lazily by
    /// [`handshake`](Self::handshake) and [`login`](Self::login).
    ///
    /// # Errors
    ///
    /// Returns error if the address is empty or the HTTP client cannot be
    /// created.
    pub fn new(
        address: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, Error> {
        let address = address.into();
        if address.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "Tapo device address is required".to_string(),
            )
            .into());
        }

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(ProtocolError::Http)?;

        Ok(Self {
            client,
            base_url: format!("http://{address}/app"),
            email: email.into(),
            password: password.into(),
            session: None,
        })
    }

    /// Returns whether a session has been established.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Discards the current session state.
    ///
    /// The next operation requires a fresh [`handshake`](Self::handshake) and
    /// [`login`](Self::login).
    pub fn reset(&mut self) {
        self.session = None;
    }

    /// Performs the handshake, establishing the session cookie.
    ///
    /// # Errors
    ///
    /// Returns error if the round-trip fails or the device does not return a
    /// session cookie.
    pub async fn handshake(&mut self) -> Result<(), Error> {
        tracing::debug!(url = %self.base_url, "Performing device handshake");

        let response = self
            .client
            .post(&self.base_url)
            .json(&serde_json::json!({ "method": "handshake" }))
            .send()
            .await
            .map_err(ProtocolError::Http)?;

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(strip_cookie_attributes)
            .ok_or(ProtocolError::AuthenticationFailed)?;

        let envelope: DeviceResponse<Value> =
            response.json().await.map_err(ProtocolError::Http)?;
        check_error_code(envelope.error_code)?;

        self.session = Some(SessionState {
            cookie,
            token: None,
        });
        Ok(())
    }

    /// Logs in with the account credentials, obtaining the request token.
    ///
    /// Requires a prior [`handshake`](Self::handshake).
    ///
    /// # Errors
    ///
    /// Returns error if no handshake has been performed or the device rejects
    /// the credentials.
    pub async fn login(&mut self) -> Result<(), Error> {
        let params = serde_json::json!({
            "username": self.email,
            "password": self.password,
        });
        let result: LoginResult = self.request("login_device", Some(params)).await?;

        let session = self
            .session
            .as_mut()
            .ok_or(ProtocolError::SessionNotEstablished)?;
        session.token = Some(result.token);

        tracing::debug!(url = %self.base_url, "Device login succeeded");
        Ok(())
    }

    /// Queries the device's current energy usage.
    ///
    /// # Errors
    ///
    /// Returns error if the session is missing or expired, or the round-trip
    /// fails.
    pub async fn energy_usage(&self) -> Result<EnergyUsage, Error> {
        self.request("get_energy_usage", None).await
    }

    /// Queries whether the device relay is on.
    ///
    /// # Errors
    ///
    /// Returns error if the session is missing or expired, or the round-trip
    /// fails.
    pub async fn device_on(&self) -> Result<bool, Error> {
        let info: DeviceInfo = self.request("get_device_info", None).await?;
        Ok(info.device_on)
    }

    /// Switches the device relay on or off.
    ///
    /// # Errors
    ///
    /// Returns error if the session is missing or expired, or the round-trip
    /// fails.
    pub async fn set_device_on(&self, on: bool) -> Result<(), Error> {
        let params = serde_json::json!({ "device_on": on });
        self.command("set_device_info", Some(params)).await
    }

    /// Sends a request and decodes its `result`.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, Error> {
        let envelope: DeviceResponse<T> = self.round_trip(method, params).await?;
        check_error_code(envelope.error_code)?;
        envelope
            .result
            .ok_or_else(|| ParseError::MissingField(format!("{method} result")).into())
    }

    /// Sends a request, checking only the error code.
    async fn command(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        let envelope: DeviceResponse<Value> = self.round_trip(method, params).await?;
        check_error_code(envelope.error_code)?;
        Ok(())
    }

    async fn round_trip<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<DeviceResponse<T>, Error> {
        let session = self
            .session
            .as_ref()
            .ok_or(ProtocolError::SessionNotEstablished)?;

        let url = match &session.token {
            Some(token) => format!("{}?token={token}", self.base_url),
            None => self.base_url.clone(),
        };

        let mut body = serde_json::json!({ "method": method });
        if let Some(params) = params {
            body["params"] = params;
        }

        tracing::trace!(method = %method, "Sending device request");

        let envelope = self
            .client
            .post(&url)
            .header(header::COOKIE, &session.cookie)
            .json(&body)
            .send()
            .await
            .map_err(ProtocolError::Http)?
            .json()
            .await
            .map_err(ProtocolError::Http)?;

        Ok(envelope)
    }
}

/// Maps a device error code to a protocol error.
fn check_error_code(code: i32) -> Result<(), ProtocolError> {
    match code {
        0 => Ok(()),
        CODE_SESSION_EXPIRED => Err(ProtocolError::SessionExpired),
        CODE_INVALID_CREDENTIALS => Err(ProtocolError::AuthenticationFailed),
        other => Err(ProtocolError::Device(other)),
    }
}

/// Strips attributes from a `Set-Cookie` value, keeping only `name=value`.
fn strip_cookie_attributes(value: &str) -> String {
    value.split(';').next().unwrap_or(value).trim().to_string()
}
