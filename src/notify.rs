// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification delivery.
//!
//! Notifications are best-effort, fire-and-forget text messages: delivery
//! failures are logged and swallowed, never propagated into the plug state
//! machines.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Client;

/// A sink for plug transition notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a notification message.
    ///
    /// Implementations must swallow delivery failures; callers do not inspect
    /// an outcome.
    async fn send(&self, message: &str);
}

/// Notifier that only writes messages to the log.
///
/// Used for plugs that opt out of external notifications.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) {
        tracing::info!(notification = %message);
    }
}

/// Notifier that posts messages to a Discord webhook.
///
/// Every message is also written to the log. When no webhook URL is
/// configured, messages are logged only, with a single warning about the
/// missing `DISCORD_WEBHOOK_URL`.
pub struct DiscordNotifier {
    client: Client,
    webhook_url: Option<String>,
    missing_url_warned: AtomicBool,
}

impl DiscordNotifier {
    /// Creates a notifier posting to the given webhook URL, if any.
    #[must_use]
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
            missing_url_warned: AtomicBool::new(false),
        }
    }

    /// Creates a notifier from the `DISCORD_WEBHOOK_URL` environment
    /// variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(std::env::var("DISCORD_WEBHOOK_URL").ok())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, message: &str) {
        tracing::info!(notification = %message);

        let Some(url) = &self.webhook_url else {
            if !self.missing_url_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "DISCORD_WEBHOOK_URL is not set, notifications are logged only"
                );
            }
            return;
        };

        let body = serde_json::json!({ "content": message });
        match self.client.post(url).json(&body).send().await {
            Ok(response) => {
                if let Err(error) = response.error_for_status() {
                    tracing::warn!(error = %error, "Discord webhook rejected notification");
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to deliver notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_message_as_webhook_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({ "content": "washer is done" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(Some(format!("{}/hook", server.uri())));
        notifier.send("washer is done").await;
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(Some(server.uri()));
        // Must not panic or surface the failure.
        notifier.send("oops").await;
    }

    #[tokio::test]
    async fn missing_webhook_url_logs_only() {
        let notifier = DiscordNotifier::new(None);
        notifier.send("first").await;
        notifier.send("second").await;
        assert!(notifier.missing_url_warned.load(Ordering::Relaxed));
    }
}
