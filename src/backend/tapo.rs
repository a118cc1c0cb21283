// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Direct-poll backend for TP-Link Tapo smart plugs.
//!
//! Every operation is a live round-trip over the device's authenticated HTTP
//! session. Tapo sessions expire silently after the device has been running
//! for a while, so each operation is wrapped in a retry-once policy: on any
//! failure the session is discarded, a fresh handshake/login sequence is run,
//! and the operation is attempted exactly one more time. A second failure
//! propagates to the caller.
//!
//! The retry is deliberately a single extra attempt with no backoff. The
//! common failure mode is session expiry, which one re-authentication fixes;
//! anything else should surface to the caller instead of being retried
//! blindly.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::PlugBackend;
use crate::config::TapoCredentials;
use crate::error::Result;
use crate::protocol::TapoSession;

/// A boxed future borrowing the session for one device operation.
type SessionOp<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Backend that polls a Tapo device directly.
///
/// The session starts unauthenticated; the first operation fails its initial
/// attempt and triggers the handshake/login sequence through the same
/// retry path that recovers expired sessions later on.
pub struct TapoBackend {
    session: Mutex<TapoSession>,
}

impl TapoBackend {
    /// Creates a backend for the device at `address`.
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be constructed.
    pub fn new(address: &str, credentials: &TapoCredentials) -> Result<Self> {
        let session = TapoSession::new(address, &credentials.email, &credentials.password)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Runs a session operation, re-authenticating once on failure.
    async fn with_reauth<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'a> Fn(&'a TapoSession) -> SessionOp<'a, T>,
    {
        let mut session = self.session.lock().await;
        match op(&session).await {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::warn!(error = %error, "Device call failed, re-authenticating");
                session.reset();
                session.handshake().await?;
                session.login().await?;
                op(&session).await
            }
        }
    }
}

#[async_trait]
impl PlugBackend for TapoBackend {
    async fn power(&self) -> Result<f64> {
        let usage = self
            .with_reauth(|session| Box::pin(session.energy_usage()))
            .await?;
        // The device reports milliwatts.
        Ok(f64::from(usage.current_power) / 1000.0)
    }

    async fn status(&self) -> Result<bool> {
        self.with_reauth(|session| Box::pin(session.device_on()))
            .await
    }

    async fn set_status(&self, on: bool) -> Result<()> {
        self.with_reauth(move |session| Box::pin(session.set_device_on(on)))
            .await
    }
}

impl std::fmt::Debug for TapoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapoBackend").finish_non_exhaustive()
    }
}
