// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plug that switches itself off after sustained low power draw.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::PlugBackend;
use crate::error::Result;
use crate::notify::Notifier;
use crate::plug::{DebounceTimer, IntelligentPlug};

/// Switches the plug off once the attached device has drawn less than the
/// configured threshold for longer than the configured duration.
///
/// Also notices when the plug is switched on externally (by hand or by
/// another controller) and announces that the automatic shut-off is armed
/// again.
pub struct PowerSavingPlug {
    name: String,
    backend: Box<dyn PlugBackend>,
    notifier: Arc<dyn Notifier>,
    power_threshold: f64,
    max_low_power_time: Duration,
    timer: DebounceTimer,
    /// Last observed on/off status; `None` until the first observation.
    last_known_on: Option<bool>,
}

impl PowerSavingPlug {
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
            timer: DebounceTimer::default(),
            last_known_on: None,
        }
    }

    async fn notify_turned_off(&self) {
        let message = format!(
            "The plug `{}` has been turned off because it drew less than {} W \
             for more than {} seconds.",
            self.name,
            self.power_threshold,
            self.max_low_power_time.as_secs_f64()
        );
        self.notifier.send(&message).await;
    }

    async fn notify_external_power_on(&self) {
        let message = format!(
            "The plug `{}` was turned on externally. It will turn off again \
             once it draws low power for more than {} seconds.",
            self.name,
            self.max_low_power_time.as_secs_f64()
        );
        self.notifier.send(&message).await;
    }
}

#[async_trait]
impl IntelligentPlug for PowerSavingPlug {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &dyn PlugBackend {
        self.backend.as_ref()
    }

    async fn update(&mut self) -> Result<()> {
        let is_on = self.backend.status().await?;

        if is_on && self.last_known_on == Some(false) {
            // Someone switched the plug on behind our back.
            self.notify_external_power_on().await;
        }
        self.last_known_on = Some(is_on);

        if !is_on {
            self.timer.clear();
            return Ok(());
        }

        let power = self.backend.power().await?;
        if self
            .timer
            .observe(power, self.power_threshold, self.max_low_power_time)
        {
            self.backend.set_status(false).await?;
            self.timer.clear();
            tracing::info!(plug = %self.name, "Switched plug off after sustained low power");
            self.notify_turned_off().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plug::testing::{RecordingNotifier, ScriptedBackend};
    use tokio::time::advance;

    const THRESHOLD: f64 = 5.0;
    const MAX_LOW: Duration = Duration::from_secs(10);

    fn saving_plug(
        backend: &ScriptedBackend,
        notifier: &RecordingNotifier,
    ) -> PowerSavingPlug {
        PowerSavingPlug::new(
            "washer",
            Box::new(backend.clone()),
            Arc::new(notifier.clone()),
            THRESHOLD,
            MAX_LOW,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn switches_off_exactly_once_after_sustained_low_power() {
        let backend = ScriptedBackend::default();
        let notifier = RecordingNotifier::default();
        let mut plug = saving_plug(&backend, &notifier);

        backend.set_on(true);
        backend.set_power(8.0);
        plug.update().await.unwrap(); // t=0, drawing power

        advance(Duration::from_secs(3)).await;
        backend.set_power(2.0);
        plug.update().await.unwrap(); // t=3, window opens

        advance(Duration::from_secs(5)).await;
        plug.update().await.unwrap(); // t=8, elapsed 5s
        assert!(backend.commands().is_empty());

        advance(Duration::from_secs(4)).await;
        plug.update().await.unwrap(); // t=12, elapsed 9s, still short
        assert!(backend.commands().is_empty());

        advance(Duration::from_secs(2)).await;
        plug.update().await.unwrap(); // t=14, elapsed 11s, fires
        assert_eq!(backend.commands(), vec![false]);

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("washer"));
        assert!(messages[0].contains("turned off"));

        // The device is now observed off; nothing further happens.
        advance(Duration::from_secs(60)).await;
        plug.update().await.unwrap();
        plug.update().await.unwrap();
        assert_eq!(backend.commands(), vec![false]);
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_above_threshold_cancels_the_window() {
        let backend = ScriptedBackend::default();
        let notifier = RecordingNotifier::default();
        let mut plug = saving_plug(&backend, &notifier);

        backend.set_on(true);
        backend.set_power(2.0);
        plug.update().await.unwrap(); // window opens

        advance(Duration::from_secs(8)).await;
        backend.set_power(7.0);
        plug.update().await.unwrap(); // recovered, window cleared

        // Low again; a full new window must elapse before any action.
        advance(Duration::from_secs(30)).await;
        backend.set_power(2.0);
        plug.update().await.unwrap();
        advance(Duration::from_secs(9)).await;
        plug.update().await.unwrap();
        assert!(backend.commands().is_empty());

        advance(Duration::from_secs(2)).await;
        plug.update().await.unwrap();
        assert_eq!(backend.commands(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn reading_exactly_at_threshold_is_not_low() {
        let backend = ScriptedBackend::default();
        let notifier = RecordingNotifier::default();
        let mut plug = saving_plug(&backend, &notifier);

        backend.set_on(true);
        backend.set_power(THRESHOLD);
        plug.update().await.unwrap();

        advance(Duration::from_secs(60)).await;
        plug.update().await.unwrap();
        assert!(backend.commands().is_empty());
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn observing_off_clears_the_window() {
        let backend = ScriptedBackend::default();
        let notifier = RecordingNotifier::default();
        let mut plug = saving_plug(&backend, &notifier);

        backend.set_on(true);
        backend.set_power(2.0);
        plug.update().await.unwrap(); // window opens

        backend.set_on(false);
        plug.update().await.unwrap(); // observed off

        // Back on with low power: the stale window must not fire.
        advance(Duration::from_secs(60)).await;
        backend.set_on(true);
        plug.update().await.unwrap();
        assert!(backend.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn external_power_on_notifies_once() {
        let backend = ScriptedBackend::default();
        let notifier = RecordingNotifier::default();
        let mut plug = saving_plug(&backend, &notifier);

        backend.set_on(false);
        backend.set_power(0.0);
        plug.update().await.unwrap();
        assert!(notifier.messages().is_empty());

        backend.set_on(true);
        backend.set_power(8.0);
        plug.update().await.unwrap();

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("turned on externally"));

        // Status stays on; no duplicate notification.
        plug.update().await.unwrap();
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_observation_on_is_not_an_external_transition() {
        let backend = ScriptedBackend::default();
        let notifier = RecordingNotifier::default();
        let mut plug = saving_plug(&backend, &notifier);

        backend.set_on(true);
        backend.set_power(8.0);
        plug.update().await.unwrap();
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_leaves_state_untouched() {
        let backend = ScriptedBackend::default();
        let notifier = RecordingNotifier::default();
        let mut plug = saving_plug(&backend, &notifier);

        backend.set_on(true);
        backend.set_power(2.0);
        plug.update().await.unwrap(); // t=0, window opens

        advance(Duration::from_secs(5)).await;
        backend.fail_reads(true);
        assert!(plug.update().await.is_err()); // t=5, read fails

        advance(Duration::from_secs(6)).await;
        backend.fail_reads(false);
        plug.update().await.unwrap(); // t=11, original window elapsed
        assert_eq!(backend.commands(), vec![false]);
    }
}
