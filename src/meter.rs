//! Meter-side Modbus RTU client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_modbus::client::{rtu, Context, Reader};
use tokio_modbus::Slave;
use tracing::debug;

use crate::config::MeterConfig;
use crate::error::{AppError, Result};
use crate::phase::PhaseSet;
use crate::registers::{decode_meter_block, METER_BLOCK_START, METER_BLOCK_WORDS};

/// One decoded meter reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub watts: PhaseSet,
    pub power_factor: PhaseSet,
    pub taken_at: Instant,
}

/// Source of measurements, read once per tick.
#[async_trait]
pub trait PowerMeter: Send {
    async fn read(&mut self) -> Result<Measurement>;
}

/// SDM630 client on the meter serial link.
pub struct SdmMeter {
    ctx: Context,
    read_timeout: Duration,
}

impl SdmMeter {
    /// Open the configured serial link and attach to the meter's slave
    /// address.
    pub fn connect(config: &MeterConfig) -> Result<Self> {
        let serial = config.open()?;
        let ctx = rtu::attach_slave(serial, Slave(config.slave_id));
        Ok(Self {
            ctx,
            read_timeout: config.read_timeout(),
        })
    }
}

#[async_trait]
impl PowerMeter for SdmMeter {
    async fn read(&mut self) -> Result<Measurement> {
        let request = self
            .ctx
            .read_input_registers(METER_BLOCK_START, METER_BLOCK_WORDS);
        let response = tokio::time::timeout(self.read_timeout, request)
            .await
            .map_err(|_| AppError::BusTimeout(self.read_timeout))??;
        let words = response.map_err(AppError::Exception)?;

        let block = decode_meter_block(&words)?;
        debug!(watts = ?block.watts, power_factor = ?block.power_factor, "meter read");
        Ok(Measurement {
            watts: block.watts,
            power_factor: block.power_factor,
            taken_at: Instant::now(),
        })
    }
}
