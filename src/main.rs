// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! plugwatch daemon: loads the plug configuration, wires the backends, and
//! drives every plug's `update` once per polling tick.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use plugwatch::notify::LogNotifier;
use plugwatch::{
    Config, DiscordNotifier, IntelligentPlug, MqttConnection, Notifier, PlugConfig,
    PowerNotifyingPlug, PowerSavingPlug, build_backend,
};

/// Default polling interval in seconds.
const DEFAULT_UPDATE_INTERVAL: f64 = 30.0;

#[tokio::main]
async fn main() -> plugwatch::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_file = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yml".to_string());
    let update_interval = std::env::var("UPDATE_INTERVAL")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(DEFAULT_UPDATE_INTERVAL);

    tracing::info!(config_file = %config_file, update_interval, "Starting plugwatch");

    let config = Config::load(&config_file)?;

    let mqtt = connect_mqtt_from_env().await?;
    let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::from_env());

    let mut plugs = build_plugs(&config, mqtt.as_ref(), &notifier).await?;
    tracing::info!(count = plugs.len(), "Loaded plugs");

    // MQTT-backed plugs serve cached telemetry; do not enter the polling
    // loop before every backend has seen its first values.
    tracing::info!("Waiting until all plug backends are ready");
    for plug in &plugs {
        plug.backend().wait_until_ready().await?;
    }
    tracing::info!("All plug backends ready");

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(update_interval));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        for plug in &mut plugs {
            if let Err(error) = plug.update().await {
                tracing::warn!(plug = plug.name(), error = %error, "Plug update failed");
            }
        }
    }
}

/// Connects to the MQTT broker named by `MQTT_BROKER_ADDRESS`, if set.
///
/// The connection is created once and injected into every `mqtt` plug
/// backend. Without the variable, `mqtt` plugs fail to build.
async fn connect_mqtt_from_env() -> plugwatch::Result<Option<Arc<MqttConnection>>> {
    let Ok(host) = std::env::var("MQTT_BROKER_ADDRESS") else {
        tracing::info!("MQTT_BROKER_ADDRESS is not set, 'mqtt' plugs are unavailable");
        return Ok(None);
    };

    let port = std::env::var("MQTT_BROKER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    tracing::info!(host = %host, port, "Connecting to MQTT broker");
    let connection = MqttConnection::builder()
        .host(host)
        .port(port)
        .build()
        .await?;

    Ok(Some(Arc::new(connection)))
}

/// Builds every configured plug with its backend.
async fn build_plugs(
    config: &Config,
    mqtt: Option<&Arc<MqttConnection>>,
    notifier: &Arc<dyn Notifier>,
) -> plugwatch::Result<Vec<Box<dyn IntelligentPlug>>> {
    let mut plugs: Vec<Box<dyn IntelligentPlug>> = Vec::with_capacity(config.plug_count());

    for (name, plug_config) in &config.power_save_plugs {
        let backend = build_backend(name, plug_config, mqtt).await?;
        plugs.push(Box::new(PowerSavingPlug::new(
            name.as_str(),
            backend,
            plug_notifier(plug_config, notifier),
            plug_config.power_threshold,
            plug_config.max_low_power_duration(),
        )));
    }

    for (name, plug_config) in &config.power_notify_plugs {
        let backend = build_backend(name, plug_config, mqtt).await?;
        plugs.push(Box::new(PowerNotifyingPlug::new(
            name.as_str(),
            backend,
            plug_notifier(plug_config, notifier),
            plug_config.power_threshold,
            plug_config.max_low_power_duration(),
        )));
    }

    Ok(plugs)
}

/// Plugs with `notify: false` write transitions to the log only.
fn plug_notifier(plug_config: &PlugConfig, notifier: &Arc<dyn Notifier>) -> Arc<dyn Notifier> {
    if plug_config.notify {
        Arc::clone(notifier)
    } else {
        Arc::new(LogNotifier)
    }
}
