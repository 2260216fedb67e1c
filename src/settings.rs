//! Connection settings for the RTU and TCP masters.
//!
//! Serial parameters are typed enums rather than free integers so invalid
//! combinations are unrepresentable; values the serial driver cannot express
//! (Mark/Space parity, 1.5 stop bits) are still representable here and
//! rejected at connect time.
//!
//! Timeouts use the conventions of the underlying handles: serial timeouts
//! are signed milliseconds with -1 meaning infinite, socket timeouts are
//! unsigned with 0 meaning infinite.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};

/// The fixed set of supported serial baud rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaudRate {
    Baud110 = 110,
    Baud150 = 150,
    Baud300 = 300,
    Baud600 = 600,
    Baud1200 = 1200,
    Baud1800 = 1800,
    Baud2400 = 2400,
    Baud4800 = 4800,
    Baud7200 = 7200,
    Baud9600 = 9600,
    Baud14400 = 14400,
    Baud19200 = 19200,
    Baud31250 = 31250,
    Baud38400 = 38400,
    Baud56000 = 56000,
    Baud57600 = 57600,
    Baud76800 = 76800,
    Baud115200 = 115200,
    Baud128000 = 128000,
    Baud230400 = 230400,
    Baud256000 = 256000,
}

impl BaudRate {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> ModbusResult<Self> {
        match value {
            110 => Ok(BaudRate::Baud110),
            150 => Ok(BaudRate::Baud150),
            300 => Ok(BaudRate::Baud300),
            600 => Ok(BaudRate::Baud600),
            1200 => Ok(BaudRate::Baud1200),
            1800 => Ok(BaudRate::Baud1800),
            2400 => Ok(BaudRate::Baud2400),
            4800 => Ok(BaudRate::Baud4800),
            7200 => Ok(BaudRate::Baud7200),
            9600 => Ok(BaudRate::Baud9600),
            14400 => Ok(BaudRate::Baud14400),
            19200 => Ok(BaudRate::Baud19200),
            31250 => Ok(BaudRate::Baud31250),
            38400 => Ok(BaudRate::Baud38400),
            56000 => Ok(BaudRate::Baud56000),
            57600 => Ok(BaudRate::Baud57600),
            76800 => Ok(BaudRate::Baud76800),
            115200 => Ok(BaudRate::Baud115200),
            128000 => Ok(BaudRate::Baud128000),
            230400 => Ok(BaudRate::Baud230400),
            256000 => Ok(BaudRate::Baud256000),
            other => Err(ModbusError::configuration(format!(
                "unsupported baud rate: {}",
                other
            ))),
        }
    }
}

/// Serial parity mode.
///
/// Mark and Space are part of the settings model but not every serial
/// driver supports them; unsupported modes fail at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Serial data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
}

/// Serial stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

/// Retry behavior for `SlaveDeviceBusy` exception responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 disables retrying).
    pub retries: u32,
    /// Delay between attempts in milliseconds.
    pub wait_to_retry_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.wait_to_retry_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            wait_to_retry_ms: 250,
        }
    }
}

/// Settings for a Modbus RTU (serial) connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtuSettings {
    /// Serial port name, e.g. "/dev/ttyUSB0" or "COM3".
    pub port: String,
    pub baud_rate: BaudRate,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    /// Read timeout in milliseconds, -1 = infinite.
    pub read_timeout_ms: i32,
    /// Write timeout in milliseconds, -1 = infinite.
    pub write_timeout_ms: i32,
    pub retry: RetryPolicy,
}

impl Default for RtuSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: BaudRate::Baud9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            read_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl RtuSettings {
    pub fn read_timeout(&self) -> Option<Duration> {
        timeout_from_signed_ms(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        timeout_from_signed_ms(self.write_timeout_ms)
    }

    /// Set a field by name. Used by interactive configuration frontends;
    /// an explicit table, one arm per field.
    pub fn set_field(&mut self, name: &str, value: &str) -> ModbusResult<()> {
        match name {
            "port" => self.port = value.to_string(),
            "baud_rate" => {
                let raw: u32 = value
                    .parse()
                    .map_err(|_| bad_value(name, value))?;
                self.baud_rate = BaudRate::from_u32(raw)?;
            }
            "parity" => {
                self.parity = match value {
                    "none" => Parity::None,
                    "odd" => Parity::Odd,
                    "even" => Parity::Even,
                    "mark" => Parity::Mark,
                    "space" => Parity::Space,
                    _ => return Err(bad_value(name, value)),
                }
            }
            "data_bits" => {
                self.data_bits = match value {
                    "5" => DataBits::Five,
                    "6" => DataBits::Six,
                    "7" => DataBits::Seven,
                    "8" => DataBits::Eight,
                    _ => return Err(bad_value(name, value)),
                }
            }
            "stop_bits" => {
                self.stop_bits = match value {
                    "1" => StopBits::One,
                    "1.5" => StopBits::OnePointFive,
                    "2" => StopBits::Two,
                    _ => return Err(bad_value(name, value)),
                }
            }
            "read_timeout_ms" => {
                self.read_timeout_ms = value.parse().map_err(|_| bad_value(name, value))?
            }
            "write_timeout_ms" => {
                self.write_timeout_ms = value.parse().map_err(|_| bad_value(name, value))?
            }
            "retries" => self.retry.retries = value.parse().map_err(|_| bad_value(name, value))?,
            "wait_to_retry_ms" => {
                self.retry.wait_to_retry_ms = value.parse().map_err(|_| bad_value(name, value))?
            }
            _ => return Err(unknown_field(name)),
        }
        Ok(())
    }

    /// Read a field by name as a display string.
    pub fn get_field(&self, name: &str) -> ModbusResult<String> {
        let value = match name {
            "port" => self.port.clone(),
            "baud_rate" => self.baud_rate.as_u32().to_string(),
            "parity" => format!("{:?}", self.parity).to_lowercase(),
            "data_bits" => (self.data_bits as u8).to_string(),
            "stop_bits" => match self.stop_bits {
                StopBits::One => "1".to_string(),
                StopBits::OnePointFive => "1.5".to_string(),
                StopBits::Two => "2".to_string(),
            },
            "read_timeout_ms" => self.read_timeout_ms.to_string(),
            "write_timeout_ms" => self.write_timeout_ms.to_string(),
            "retries" => self.retry.retries.to_string(),
            "wait_to_retry_ms" => self.retry.wait_to_retry_ms.to_string(),
            _ => return Err(unknown_field(name)),
        };
        Ok(value)
    }
}

/// Settings for a Modbus TCP connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpSettings {
    /// Host name or IP address.
    pub host: String,
    pub port: u16,
    /// Receive timeout in milliseconds, 0 = infinite.
    pub receive_timeout_ms: u32,
    /// Send timeout in milliseconds, 0 = infinite.
    pub send_timeout_ms: u32,
    /// Connect timeout in milliseconds, 0 = infinite.
    pub connect_timeout_ms: u32,
    pub retry: RetryPolicy,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::DEFAULT_TCP_PORT,
            receive_timeout_ms: 10_000,
            send_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl TcpSettings {
    pub fn receive_timeout(&self) -> Option<Duration> {
        timeout_from_unsigned_ms(self.receive_timeout_ms)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        timeout_from_unsigned_ms(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        timeout_from_unsigned_ms(self.connect_timeout_ms)
    }

    pub fn set_field(&mut self, name: &str, value: &str) -> ModbusResult<()> {
        match name {
            "host" => self.host = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| bad_value(name, value))?,
            "receive_timeout_ms" => {
                self.receive_timeout_ms = value.parse().map_err(|_| bad_value(name, value))?
            }
            "send_timeout_ms" => {
                self.send_timeout_ms = value.parse().map_err(|_| bad_value(name, value))?
            }
            "connect_timeout_ms" => {
                self.connect_timeout_ms = value.parse().map_err(|_| bad_value(name, value))?
            }
            "retries" => self.retry.retries = value.parse().map_err(|_| bad_value(name, value))?,
            "wait_to_retry_ms" => {
                self.retry.wait_to_retry_ms = value.parse().map_err(|_| bad_value(name, value))?
            }
            _ => return Err(unknown_field(name)),
        }
        Ok(())
    }

    pub fn get_field(&self, name: &str) -> ModbusResult<String> {
        let value = match name {
            "host" => self.host.clone(),
            "port" => self.port.to_string(),
            "receive_timeout_ms" => self.receive_timeout_ms.to_string(),
            "send_timeout_ms" => self.send_timeout_ms.to_string(),
            "connect_timeout_ms" => self.connect_timeout_ms.to_string(),
            "retries" => self.retry.retries.to_string(),
            "wait_to_retry_ms" => self.retry.wait_to_retry_ms.to_string(),
            _ => return Err(unknown_field(name)),
        };
        Ok(value)
    }
}

fn timeout_from_signed_ms(ms: i32) -> Option<Duration> {
    if ms < 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

fn timeout_from_unsigned_ms(ms: u32) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

fn bad_value(name: &str, value: &str) -> ModbusError {
    ModbusError::configuration(format!("invalid value for {}: {:?}", name, value))
}

fn unknown_field(name: &str) -> ModbusError {
    ModbusError::configuration(format!("unknown settings field: {:?}", name))
}
