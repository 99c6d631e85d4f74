use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub meter: MeterConfig,
    pub inverter: InverterConfig,
    /// Net export allowed before the bridge starts capping, in W.
    pub export_budget_w: f64,
    /// Telemetry is disabled when this section is absent.
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

/// Serial link the bridge reads the meter over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Serial device, e.g. "/dev/ttyS0".
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// "none", "even" or "odd".
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// Upper bound for one register read.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Measurement cadence.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Serial link the inverter polls the emulated meter over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConfig {
    /// Serial device, e.g. "/dev/ttyUSB1".
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// "none", "even" or "odd".
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Slave address the emulated meter answers on.
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Topic prefix; payloads go to "<base_topic>/power" and
    /// "<base_topic>/energy".
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_parity() -> String {
    "none".into()
}
fn default_slave_id() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_base_topic() -> String {
    "sdm-bridge".into()
}
fn default_summary_interval_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from a YAML file with environment variable
    /// substitution.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.meter.device.is_empty() {
            return Err(AppError::Config("meter.device cannot be empty".into()));
        }
        if self.inverter.device.is_empty() {
            return Err(AppError::Config("inverter.device cannot be empty".into()));
        }
        if self.meter.device == self.inverter.device {
            return Err(AppError::Config(
                "meter and inverter cannot share one serial device".into(),
            ));
        }
        parse_parity(&self.meter.parity)?;
        parse_parity(&self.inverter.parity)?;
        if self.meter.read_timeout_ms == 0 {
            return Err(AppError::Config("meter.read_timeout_ms cannot be 0".into()));
        }
        if self.meter.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "meter.poll_interval_ms cannot be 0".into(),
            ));
        }
        if !self.export_budget_w.is_finite() || self.export_budget_w < 0.0 {
            return Err(AppError::Config(
                "export_budget_w must be a finite value >= 0".into(),
            ));
        }
        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.is_empty() {
                return Err(AppError::Config("mqtt.host cannot be empty".into()));
            }
            if mqtt.port == 0 {
                return Err(AppError::Config("mqtt.port cannot be 0".into()));
            }
            if mqtt.base_topic.is_empty() {
                return Err(AppError::Config("mqtt.base_topic cannot be empty".into()));
            }
            if mqtt.summary_interval_secs == 0 {
                return Err(AppError::Config(
                    "mqtt.summary_interval_secs cannot be 0".into(),
                ));
            }
        }
        Ok(())
    }
}

impl MeterConfig {
    pub fn open(&self) -> Result<SerialStream> {
        open_link(&self.device, self.baud_rate, &self.parity)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl InverterConfig {
    pub fn open(&self) -> Result<SerialStream> {
        open_link(&self.device, self.baud_rate, &self.parity)
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }
}

// Both devices speak 8 data bits and 1 stop bit; only parity is a knob.
fn open_link(device: &str, baud_rate: u32, parity: &str) -> Result<SerialStream> {
    let builder = tokio_serial::new(device, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(parse_parity(parity)?)
        .stop_bits(StopBits::One);
    Ok(SerialStream::open(&builder)?)
}

fn parse_parity(value: &str) -> Result<Parity> {
    match value {
        "none" => Ok(Parity::None),
        "even" => Ok(Parity::Even),
        "odd" => Ok(Parity::Odd),
        other => Err(AppError::Config(format!(
            "unknown parity '{}', expected none, even or odd",
            other
        ))),
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$" (escape).
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c == '$' {
            match it.peek().copied() {
                Some('$') => {
                    it.next();
                    out.push('$');
                }
                Some('(') => {
                    it.next();
                    out.push_str(&lookup_var(&mut it, ')')?);
                }
                Some('{') => {
                    it.next();
                    out.push_str(&lookup_var(&mut it, '}')?);
                }
                _ => {
                    // Not a placeholder; keep the '$' as-is
                    out.push('$');
                }
            }
        } else {
            out.push(c);
        }
    }

    Ok(out)
}

fn lookup_var<I>(it: &mut std::iter::Peekable<I>, end: char) -> Result<String>
where
    I: Iterator<Item = char>,
{
    let var = read_until(it, end).ok_or_else(|| {
        AppError::Config(format!("unterminated env placeholder: missing '{}'", end))
    })?;
    std::env::var(&var)
        .map_err(|_| AppError::Config(format!("missing environment variable: {}", var)))
}

/// Read characters until we hit `end`, returning the collected string.
/// Consumes the closing delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
