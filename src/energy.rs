//! Daily energy accounting and day rollover.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::error::Result;
use crate::phase::PhaseSet;

/// Integration steps at least this long are dropped: the clock jumped or the
/// cycle stalled, and attributing that much time to one reading would spike
/// the totals.
pub const MAX_INTEGRATION_GAP_SECS: f64 = 5.0;

/// Energy totals of one closed calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTotals {
    pub date: NaiveDate,
    pub import_wh: f64,
    pub export_wh: f64,
}

/// Import/export watt-hour counters for the current day.
///
/// Shared behind one mutex by the measurement cycle (integration) and the
/// rollover watcher; both only hold the lock for the arithmetic.
#[derive(Debug)]
pub struct EnergyLedger {
    date: NaiveDate,
    import_wh: f64,
    export_wh: f64,
}

/// Ledger handle shared by the tick path, the rollover watcher and the
/// telemetry summary task.
pub type SharedLedger = Arc<Mutex<EnergyLedger>>;

impl EnergyLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            import_wh: 0.0,
            export_wh: 0.0,
        }
    }

    pub fn shared(date: NaiveDate) -> SharedLedger {
        Arc::new(Mutex::new(Self::new(date)))
    }

    /// Attribute `dt_secs` seconds at the summed phase power to today's
    /// totals. A net-importing interval adds to `import_wh`, a net-exporting
    /// one adds its magnitude to `export_wh`; a zero-sum interval adds to
    /// neither. Gaps of [`MAX_INTEGRATION_GAP_SECS`] or more are skipped
    /// without error.
    pub fn integrate(&mut self, watts: PhaseSet, dt_secs: f64) {
        if dt_secs >= MAX_INTEGRATION_GAP_SECS {
            return;
        }
        let wh = watts.sum() * dt_secs / 3600.0;
        if wh > 0.0 {
            self.import_wh += wh;
        } else if wh < 0.0 {
            self.export_wh += -wh;
        }
    }

    /// Close the day once `observed` differs from the ledger date: returns
    /// the finalized totals and restarts the counters at zero under the new
    /// date. Same-date calls return `None` and change nothing.
    pub fn rollover(&mut self, observed: NaiveDate) -> Option<DailyTotals> {
        if observed == self.date {
            return None;
        }
        let finalized = DailyTotals {
            date: self.date,
            import_wh: self.import_wh,
            export_wh: self.export_wh,
        };
        self.date = observed;
        self.import_wh = 0.0;
        self.export_wh = 0.0;
        Some(finalized)
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn import_wh(&self) -> f64 {
        self.import_wh
    }

    pub fn export_wh(&self) -> f64 {
        self.export_wh
    }
}

/// Receives the finalized totals of a closed day.
#[async_trait]
pub trait DailySink: Send + Sync {
    async fn store(&self, totals: &DailyTotals) -> Result<()>;
}

/// Sink that only writes the closed day to the log.
pub struct LogSink;

#[async_trait]
impl DailySink for LogSink {
    async fn store(&self, totals: &DailyTotals) -> Result<()> {
        info!(
            date = %totals.date,
            imp_kwh = totals.import_wh / 1000.0,
            exp_kwh = totals.export_wh / 1000.0,
            "day closed"
        );
        Ok(())
    }
}

/// Close the ledger day whenever the local calendar date moves on.
///
/// Checks every `period`; the sink runs outside the ledger lock.
pub async fn run_rollover_watcher(
    ledger: SharedLedger,
    sink: Arc<dyn DailySink>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let finalized = {
            let mut ledger = ledger.lock().unwrap();
            ledger.rollover(Local::now().date_naive())
        };
        if let Some(totals) = finalized {
            if let Err(e) = sink.store(&totals).await {
                error!(error = %e, date = %totals.date, "failed to store daily totals");
            }
        }
    }
}
