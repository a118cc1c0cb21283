// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Debounced plug control state machines.
//!
//! An [`IntelligentPlug`] wraps a monitoring backend and decides, on each
//! [`update`](IntelligentPlug::update) invocation, whether anything should
//! happen based on sustained low power draw:
//!
//! - [`PowerSavingPlug`] switches the plug off once it has drawn less than a
//!   configured threshold for longer than a configured duration.
//! - [`PowerNotifyingPlug`] never commands the device; it only reports on/off
//!   transitions inferred from power draw.
//!
//! Both share the same debounce core: a single optional "low power since"
//! timestamp that starts when a reading drops below the threshold, clears
//! when a reading reaches it again, and trips the action once the window
//! exceeds the configured maximum. Correctness depends only on wall-clock
//! timestamps, so `update` may be called at any cadence; detection latency is
//! bounded below by the caller's polling interval.

mod power_notifying;
mod power_saving;

pub use power_notifying::PowerNotifyingPlug;
pub use power_saving::PowerSavingPlug;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::backend::PlugBackend;
use crate::error::Result;

/// A plug with an autonomous per-tick decision procedure.
#[async_trait]
pub trait IntelligentPlug: Send {
    /// The plug's configured name, used in logs and notifications.
    fn name(&self) -> &str;

    /// The monitoring backend driving this plug.
    fn backend(&self) -> &dyn PlugBackend;

    /// Runs one observe/decide cycle.
    ///
    /// # Errors
    ///
    /// Propagates backend failures unchanged; the plug's debounce state is
    /// only mutated after a successful observation.
    async fn update(&mut self) -> Result<()>;
}

/// Tracks how long power draw has stayed below a threshold.
#[derive(Debug, Default)]
pub(crate) struct DebounceTimer {
    low_power_since: Option<Instant>,
}

impl DebounceTimer {
    /// Feeds one power sample into the timer.
    ///
    /// Returns `true` once readings below `threshold` have spanned strictly
    /// more than `max_low_power_time`. A reading at or above the threshold
    /// clears the window; a reading exactly equal to the threshold counts as
    /// not-low.
    pub(crate) fn observe(
        &mut self,
        power: f64,
        threshold: f64,
        max_low_power_time: Duration,
    ) -> bool {
        if power < threshold {
            match self.low_power_since {
                None => {
                    self.low_power_since = Some(Instant::now());
                    false
                }
                Some(since) => since.elapsed() > max_low_power_time,
            }
        } else {
            self.low_power_since = None;
            false
        }
    }

    /// Unsets the window.
    pub(crate) fn clear(&mut self) {
        self.low_power_since = None;
    }

    /// Returns whether a low-power window is currently open.
    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.low_power_since.is_some()
    }
}
