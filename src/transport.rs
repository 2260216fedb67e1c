//! Byte-level transports for Modbus TCP and RTU.
//!
//! A transport owns its OS handle (socket or serial port) exclusively and
//! moves whole frames: `send` writes one complete frame, `receive` returns
//! one complete frame. Framing knowledge stops at frame boundaries; parsing
//! and transaction matching live above this layer.
//!
//! `connect` distinguishes "device absent" from misconfiguration: an
//! unreachable host or unopenable port yields `Ok(false)`, while settings
//! the driver cannot express yield a `Configuration` error.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::settings::{Parity, RtuSettings, StopBits, TcpSettings};
use crate::{MAX_RTU_FRAME_SIZE, MAX_TCP_FRAME_SIZE, MBAP_HEADER_SIZE};

/// Transport statistics counters.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub timeouts: u64,
    pub errors: u64,
}

/// Abstract frame-oriented byte channel to a Modbus device.
#[async_trait]
pub trait ModbusTransport: Send {
    /// Establish the connection. `Ok(false)` means the device/port could
    /// not be reached; errors are reserved for unrealizable settings and
    /// unexpected failures.
    async fn connect(&mut self) -> ModbusResult<bool>;

    /// Tear the connection down. Safe to call repeatedly.
    async fn disconnect(&mut self) -> ModbusResult<()>;

    fn is_connected(&self) -> bool;

    /// Write one complete frame.
    async fn send(&mut self, frame: &[u8]) -> ModbusResult<()>;

    /// Read one complete frame. `limit` bounds the wait for the frame to
    /// start arriving; `None` waits forever.
    async fn receive(&mut self, limit: Option<Duration>) -> ModbusResult<Vec<u8>>;

    fn stats(&self) -> TransportStats;
}

async fn bounded<F, T>(
    limit: Option<Duration>,
    operation: &str,
    fut: F,
) -> ModbusResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => result.map_err(ModbusError::from),
            Err(_) => Err(ModbusError::timeout(operation, limit.as_millis() as u64)),
        },
        None => fut.await.map_err(ModbusError::from),
    }
}

/// Modbus TCP transport over a stream socket.
pub struct TcpTransport {
    settings: TcpSettings,
    stream: Option<TcpStream>,
    stats: TransportStats,
}

impl TcpTransport {
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            settings,
            stream: None,
            stats: TransportStats::default(),
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&mut self) -> ModbusResult<bool> {
        self.stream = None;

        let target = (self.settings.host.as_str(), self.settings.port);
        let attempt = TcpStream::connect(target);
        let result = match self.settings.connect_timeout() {
            Some(limit) => match timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(
                        host = %self.settings.host,
                        port = self.settings.port,
                        "connect timed out"
                    );
                    return Ok(false);
                }
            },
            None => attempt.await,
        };

        match result {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                self.stream = Some(stream);
                Ok(true)
            }
            Err(e) => {
                debug!(
                    host = %self.settings.host,
                    port = self.settings.port,
                    error = %e,
                    "connect failed"
                );
                Ok(false)
            }
        }
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let limit = self.settings.send_timeout();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("not connected"))?;

        debug!("TCP send {} bytes: {}", frame.len(), hex::encode(frame));

        let result = bounded(limit, "send frame", stream.write_all(frame)).await;
        match result {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                if matches!(e, ModbusError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                self.stats.errors += 1;
                self.stream = None;
                Err(e)
            }
        }
    }

    async fn receive(&mut self, limit: Option<Duration>) -> ModbusResult<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("not connected"))?;

        // MBAP header first; its length field tells us how much follows.
        let mut header = [0u8; MBAP_HEADER_SIZE];
        let header_read = bounded(limit, "receive header", stream.read_exact(&mut header)).await;
        if let Err(e) = header_read {
            if matches!(e, ModbusError::Timeout { .. }) {
                self.stats.timeouts += 1;
            }
            self.stats.errors += 1;
            self.stream = None;
            return Err(e);
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 || MBAP_HEADER_SIZE - 1 + length > MAX_TCP_FRAME_SIZE {
            self.stats.errors += 1;
            return Err(ModbusError::frame(format!(
                "MBAP length field out of range: {}",
                length
            )));
        }

        // Unit id is already in the header; the remainder is the PDU.
        let mut frame = vec![0u8; MBAP_HEADER_SIZE - 1 + length];
        frame[..MBAP_HEADER_SIZE].copy_from_slice(&header);
        let body_read = bounded(
            limit,
            "receive body",
            stream.read_exact(&mut frame[MBAP_HEADER_SIZE..]),
        )
        .await;
        if let Err(e) = body_read {
            if matches!(e, ModbusError::Timeout { .. }) {
                self.stats.timeouts += 1;
            }
            self.stats.errors += 1;
            self.stream = None;
            return Err(e);
        }

        debug!("TCP recv {} bytes: {}", frame.len(), hex::encode(&frame));

        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        Ok(frame)
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Modbus RTU transport over a serial port.
pub struct RtuTransport {
    settings: RtuSettings,
    port: Option<tokio_serial::SerialStream>,
    /// Minimum silence between frames, 3.5 character times at 11 bits
    /// per character.
    frame_gap: Duration,
    stats: TransportStats,
}

impl RtuTransport {
    pub fn new(settings: RtuSettings) -> Self {
        let char_time_us = (11_000_000 / settings.baud_rate.as_u32()) as u64;
        let frame_gap = Duration::from_micros((char_time_us * 35 / 10).max(1));
        Self {
            settings,
            port: None,
            frame_gap,
            stats: TransportStats::default(),
        }
    }

    fn serial_parity(&self) -> ModbusResult<tokio_serial::Parity> {
        match self.settings.parity {
            Parity::None => Ok(tokio_serial::Parity::None),
            Parity::Odd => Ok(tokio_serial::Parity::Odd),
            Parity::Even => Ok(tokio_serial::Parity::Even),
            Parity::Mark | Parity::Space => Err(ModbusError::configuration(format!(
                "parity {:?} is not supported by the serial driver",
                self.settings.parity
            ))),
        }
    }

    fn serial_stop_bits(&self) -> ModbusResult<tokio_serial::StopBits> {
        match self.settings.stop_bits {
            StopBits::One => Ok(tokio_serial::StopBits::One),
            StopBits::Two => Ok(tokio_serial::StopBits::Two),
            StopBits::OnePointFive => Err(ModbusError::configuration(
                "1.5 stop bits are not supported by the serial driver",
            )),
        }
    }

    fn serial_data_bits(&self) -> tokio_serial::DataBits {
        match self.settings.data_bits {
            crate::settings::DataBits::Five => tokio_serial::DataBits::Five,
            crate::settings::DataBits::Six => tokio_serial::DataBits::Six,
            crate::settings::DataBits::Seven => tokio_serial::DataBits::Seven,
            crate::settings::DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn connect(&mut self) -> ModbusResult<bool> {
        self.port = None;

        // Unrealizable settings are a configuration error, not "absent".
        let parity = self.serial_parity()?;
        let stop_bits = self.serial_stop_bits()?;

        let builder = tokio_serial::new(&self.settings.port, self.settings.baud_rate.as_u32())
            .data_bits(self.serial_data_bits())
            .stop_bits(stop_bits)
            .parity(parity);

        match tokio_serial::SerialStream::open(&builder) {
            Ok(port) => {
                self.port = Some(port);
                Ok(true)
            }
            Err(e) => {
                debug!(port = %self.settings.port, error = %e, "serial open failed");
                Ok(false)
            }
        }
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        self.port = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let gap = self.frame_gap;
        let limit = self.settings.write_timeout();
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not connected"))?;

        // Respect bus silence before transmitting.
        tokio::time::sleep(gap).await;

        debug!("RTU send {} bytes: {}", frame.len(), hex::encode(frame));

        let result = bounded(limit, "send frame", port.write_all(frame)).await;
        match result {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                if matches!(e, ModbusError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    async fn receive(&mut self, limit: Option<Duration>) -> ModbusResult<Vec<u8>> {
        let gap = self.frame_gap;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not connected"))?;

        let mut frame = Vec::new();
        let mut byte = [0u8; 1];

        // The first byte may take the full response time of the device;
        // after that the frame ends when the line goes quiet for the gap.
        let first_read = bounded(limit, "receive frame", port.read_exact(&mut byte)).await;
        if let Err(e) = first_read {
            if matches!(e, ModbusError::Timeout { .. }) {
                self.stats.timeouts += 1;
            }
            self.stats.errors += 1;
            return Err(e);
        }
        frame.push(byte[0]);

        loop {
            let next = timeout(gap, port.read_exact(&mut byte)).await;
            match next {
                Ok(Ok(_)) => {
                    frame.push(byte[0]);
                    if frame.len() > MAX_RTU_FRAME_SIZE {
                        self.stats.errors += 1;
                        return Err(ModbusError::frame("RTU frame too large"));
                    }
                }
                Ok(Err(e)) => {
                    self.stats.errors += 1;
                    return Err(ModbusError::from(e));
                }
                // Gap elapsed, frame complete.
                Err(_) => break,
            }
        }

        if frame.len() < 4 {
            self.stats.errors += 1;
            warn!("short RTU frame: {}", hex::encode(&frame));
            return Err(ModbusError::frame(format!(
                "RTU frame too short: {} bytes",
                frame.len()
            )));
        }

        debug!("RTU recv {} bytes: {}", frame.len(), hex::encode(&frame));

        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        Ok(frame)
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
