use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sdm_bridge::config::Config;
use sdm_bridge::cycle::MeasurementCycle;
use sdm_bridge::energy::{self, EnergyLedger, LogSink};
use sdm_bridge::meter::SdmMeter;
use sdm_bridge::slave::{self, ImageService, MeterImage};
use sdm_bridge::telemetry::{self, TickTelemetry};

const ROLLOVER_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        meter = %cfg.meter.device,
        inverter = %cfg.inverter.device,
        budget_w = cfg.export_budget_w,
        "loaded config"
    );

    let meter = SdmMeter::connect(&cfg.meter)?;
    info!(device = %cfg.meter.device, slave_id = cfg.meter.slave_id, "meter link open");

    let image = MeterImage::new();
    let inverter_serial = cfg.inverter.open()?;
    let service = ImageService::new(cfg.inverter.slave_id, image.clone());
    let (abort_tx, abort_rx) = oneshot::channel();
    let server_task = tokio::spawn(slave::serve(inverter_serial, service, abort_rx));
    info!(
        device = %cfg.inverter.device,
        slave_id = cfg.inverter.slave_id,
        "emulated meter serving"
    );

    let ledger = EnergyLedger::shared(Local::now().date_naive());
    tokio::spawn(energy::run_rollover_watcher(
        ledger.clone(),
        Arc::new(LogSink),
        ROLLOVER_CHECK_INTERVAL,
    ));

    let tick_telemetry = cfg.mqtt.as_ref().map(|mqtt_cfg| {
        let (handle, eventloop) = telemetry::connect(mqtt_cfg);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        tokio::spawn(telemetry::run_event_loop(eventloop));
        tokio::spawn(telemetry::run_summary_publisher(
            handle.clone(),
            snapshot_rx,
            ledger.clone(),
            mqtt_cfg.summary_interval(),
        ));
        info!(host = %mqtt_cfg.host, base_topic = %mqtt_cfg.base_topic, "telemetry enabled");
        TickTelemetry::new(handle, snapshot_tx)
    });

    let cycle = MeasurementCycle::new(meter, cfg.export_budget_w, image, ledger, tick_telemetry);

    tokio::select! {
        biased;
        _ = shutdown_signal() => {}
        _ = cycle.run(cfg.meter.poll_interval()) => {}
    }

    // Stop the RTU server so the inverter port closes before exit.
    let _ = abort_tx.send(());
    match server_task.await {
        Ok(Ok(_)) => info!("emulated meter stopped"),
        Ok(Err(e)) => warn!(error = %e, "emulated meter exited with transport error"),
        Err(e) => warn!(error = %e, "emulated meter task failed"),
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
