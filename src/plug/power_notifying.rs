// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plug that reports on/off transitions inferred from power draw.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::PlugBackend;
use crate::error::Result;
use crate::notify::Notifier;
use crate::plug::{DebounceTimer, IntelligentPlug};

/// Observe-only variant: never commands the device.
///
/// The device behind the plug (a washing machine, a printer) is considered
/// "on" once its power draw rises above the threshold and "off" once the draw
/// has stayed below the threshold for longer than the configured duration.
/// Each transition emits one notification. Only power is read; the plug's
/// own on/off status plays no role.
pub struct PowerNotifyingPlug {
    name: String,
    backend: Box<dyn PlugBackend>,
    notifier: Arc<dyn Notifier>,
    power_threshold: f64,
    max_low_power_time: Duration,
    /// Belief about device on-ness, derived purely from power readings.
    considered_on: bool,
    timer: DebounceTimer,
}

impl PowerNotifyingPlug {
    /// Creates the plug state machine.
    pub fn new(
        name: impl Into<String>,
        backend: Box<dyn PlugBackend>,
        notifier: Arc<dyn Notifier>,
        power_threshold: f64,
        max_low_power_time: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            notifier,
            power_threshold,
            max_low_power_time,
            considered_on: false,
            timer: DebounceTimer::default(),
        }
    }

    async fn notify_turned_on(&self) {
        let message = format!(
            "The device on plug `{}` appears to have turned on, it is drawing \
             power now.",
            self.name
        );
        self.notifier.send(&message).await;
    }

    async fn notify_turned_off(&self) {
        let message = format!(
            "The device on plug `{}` appears to have turned off after drawing \
             low power for more than {} seconds.",
            self.name,
            self.max_low_power_time.as_secs_f64()
        );
        self.notifier.send(&message).await;
    }
}

#[async_trait]
impl IntelligentPlug for PowerNotifyingPlug {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &dyn PlugBackend {
        self.backend.as_ref()
    }

    async fn update(&mut self) -> Result<()> {
        let power = self.backend.power().await?;

        if !self.considered_on {
            if power > self.power_threshold {
                self.considered_on = true;
                tracing::info!(plug = %self.name, power, "Device started drawing power");
                self.notify_turned_on().await;
            }
            return Ok(());
        }

        if self
            .timer
            .observe(power, self.power_threshold, self.max_low_power_time)
        {
            self.considered_on = false;
            self.timer.clear();
            tracing::info!(plug = %self.name, "Device stopped drawing power");
            self.notify_turned_off().await;
        }

        Ok(())
    }
}
