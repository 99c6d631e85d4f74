use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Meter read timed out after {0:?}")]
    BusTimeout(Duration),

    #[error("Modbus error: {0}")]
    Modbus(#[from] tokio_modbus::Error),

    #[error("Modbus exception: {0}")]
    Exception(tokio_modbus::Exception),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
