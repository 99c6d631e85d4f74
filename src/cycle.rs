//! The measurement cycle: read, derive, allocate, encode, integrate.

use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::budget;
use crate::energy::SharedLedger;
use crate::error::Result;
use crate::meter::PowerMeter;
use crate::power;
use crate::registers::encode_image;
use crate::slave::MeterImage;
use crate::telemetry::TickTelemetry;

/// Fixed-cadence orchestrator of the bridge pipeline.
///
/// Owns the meter client for the whole process lifetime; nothing else
/// touches the meter link, so reads can never overlap.
pub struct MeasurementCycle<M> {
    meter: M,
    export_budget_w: f64,
    image: MeterImage,
    ledger: SharedLedger,
    telemetry: Option<TickTelemetry>,
    last_read: Option<Instant>,
}

impl<M: PowerMeter> MeasurementCycle<M> {
    pub fn new(
        meter: M,
        export_budget_w: f64,
        image: MeterImage,
        ledger: SharedLedger,
        telemetry: Option<TickTelemetry>,
    ) -> Self {
        Self {
            meter,
            export_budget_w,
            image,
            ledger,
            telemetry,
            last_read: None,
        }
    }

    /// Tick forever at `period`. An overrunning tick delays the next one;
    /// two ticks never run at once.
    pub async fn run(mut self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "tick failed, serving the previous image");
            }
        }
    }

    /// One pass of the pipeline. This is public for testing purposes.
    ///
    /// Any failure aborts the whole tick: the previous image stays
    /// published, no energy is attributed, and the elapsed time rolls into
    /// the next successful read.
    pub async fn tick(&mut self) -> Result<()> {
        let measurement = self.meter.read().await?;
        let derived = power::derive(measurement.watts, measurement.power_factor)?;
        let allocation = budget::allocate(measurement.watts, self.export_budget_w);

        self.image
            .store(encode_image(allocation.watts, derived.apparent));

        if let Some(previous) = self.last_read {
            let dt = measurement.taken_at.duration_since(previous).as_secs_f64();
            let mut ledger = self.ledger.lock().unwrap();
            ledger.integrate(measurement.watts, dt);
        }
        self.last_read = Some(measurement.taken_at);

        debug!(
            served = ?allocation.watts,
            remaining_w = allocation.remaining_w,
            "tick complete"
        );
        if let Some(telemetry) = &self.telemetry {
            telemetry.publish(measurement.watts);
        }
        Ok(())
    }
}
