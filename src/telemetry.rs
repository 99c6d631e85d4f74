//! MQTT telemetry for instantaneous power and daily energy.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

use crate::config::MqttConfig;
use crate::energy::SharedLedger;
use crate::phase::PhaseSet;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;
pub type QoS = mqtt5::mqttbytes::QoS;

/// Instantaneous true power of the three phases.
#[derive(Debug, Clone, Serialize)]
pub struct PowerSnapshot {
    pub date: DateTime<Local>,
    #[serde(rename = "L1")]
    pub l1: f64,
    #[serde(rename = "L2")]
    pub l2: f64,
    #[serde(rename = "L3")]
    pub l3: f64,
}

impl PowerSnapshot {
    pub fn now(watts: PhaseSet) -> Self {
        Self {
            date: Local::now(),
            l1: watts.l1(),
            l2: watts.l2(),
            l3: watts.l3(),
        }
    }
}

/// Running totals of the current day, in kWh.
#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    #[serde(rename = "imp_kWh")]
    pub imp_kwh: f64,
    #[serde(rename = "exp_kWh")]
    pub exp_kwh: f64,
}

/// Fire-and-forget publisher.
///
/// A publish never blocks the caller: when the client's request queue is
/// full the payload is dropped with a debug line.
#[derive(Clone)]
pub struct Telemetry {
    client: AsyncClient,
    power_topic: String,
    energy_topic: String,
}

/// Build the client for the configured broker. The returned event loop must
/// be driven by [`run_event_loop`] for anything to go out.
pub fn connect(config: &MqttConfig) -> (Telemetry, EventLoop) {
    let client_id = format!("sdm-bridge-{}", Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive());
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user.clone(), pass.clone());
    }
    if config.port == 8883 {
        options.set_transport(Transport::tls_with_default_config());
    }

    let (client, eventloop) = AsyncClient::new(options, 16);
    let telemetry = Telemetry {
        client,
        power_topic: format!("{}/power", config.base_topic),
        energy_topic: format!("{}/energy", config.base_topic),
    };
    (telemetry, eventloop)
}

impl Telemetry {
    pub fn publish_power(&self, snapshot: &PowerSnapshot) {
        self.try_send(&self.power_topic, snapshot);
    }

    pub fn publish_energy(&self, summary: &DailySummary) {
        self.try_send(&self.energy_topic, summary);
    }

    fn try_send<T: Serialize>(&self, topic: &str, payload: &T) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, topic, "failed to serialize telemetry payload");
                return;
            }
        };
        if let Err(e) = self.client.try_publish(topic, QoS::AtMostOnce, false, bytes) {
            debug!(error = %e, topic, "telemetry publish skipped");
        }
    }
}

/// Tick-side telemetry: the quick publish plus the feed for the summary
/// task.
pub struct TickTelemetry {
    telemetry: Telemetry,
    snapshot_tx: watch::Sender<Option<PowerSnapshot>>,
}

impl TickTelemetry {
    pub fn new(telemetry: Telemetry, snapshot_tx: watch::Sender<Option<PowerSnapshot>>) -> Self {
        Self {
            telemetry,
            snapshot_tx,
        }
    }

    /// Publish the measured watts and remember them for the next summary.
    pub fn publish(&self, watts: PhaseSet) {
        let snapshot = PowerSnapshot::now(watts);
        self.telemetry.publish_power(&snapshot);
        let _ = self.snapshot_tx.send(Some(snapshot));
    }
}

/// Drive the broker connection; rumqttc reconnects on the poll after a
/// failed one.
pub async fn run_event_loop(mut eventloop: EventLoop) {
    loop {
        if let Err(e) = eventloop.poll().await {
            warn!(error = %e, "MQTT connection error");
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

/// Re-publish the latest snapshot together with the daily summary on a slow
/// fixed cadence.
pub async fn run_summary_publisher(
    telemetry: Telemetry,
    snapshot_rx: watch::Receiver<Option<PowerSnapshot>>,
    ledger: SharedLedger,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;

        let latest = snapshot_rx.borrow().clone();
        if let Some(snapshot) = latest {
            telemetry.publish_power(&snapshot);
        }

        let summary = {
            let ledger = ledger.lock().unwrap();
            DailySummary {
                date: ledger.date(),
                imp_kwh: ledger.import_wh() / 1000.0,
                exp_kwh: ledger.export_wh() / 1000.0,
            }
        };
        telemetry.publish_energy(&summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_power_snapshot_payload_field_names() {
        let snapshot = PowerSnapshot::now(PhaseSet::new(-2000.0, -1000.0, 500.0));

        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["L1"], json!(-2000.0));
        assert_eq!(value["L2"], json!(-1000.0));
        assert_eq!(value["L3"], json!(500.0));
        assert!(value["date"].is_string());
    }

    #[test]
    fn test_daily_summary_payload_field_names() {
        let summary = DailySummary {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            imp_kwh: 12.5,
            exp_kwh: 3.25,
        };

        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(
            value,
            json!({
                "date": "2024-06-01",
                "imp_kWh": 12.5,
                "exp_kWh": 3.25,
            })
        );
    }
}
