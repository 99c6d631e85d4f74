pub mod budget;
pub mod config;
pub mod cycle;
pub mod energy;
pub mod error;
pub mod meter;
pub mod phase;
pub mod power;
pub mod registers;
pub mod slave;
pub mod telemetry;

// Re-export commonly used items
pub use config::Config;
pub use cycle::MeasurementCycle;
pub use error::{AppError, Result};
pub use meter::{Measurement, PowerMeter};
pub use phase::PhaseSet;
