//! # modbus-master
//!
//! Modbus TCP and RTU master (client) protocol engine with a typed
//! register access layer.
//!
//! The crate is layered: byte [`transport`]s move whole frames, the pure
//! [`frame`] codecs translate frames to protocol structures, the
//! [`transaction`] manager pairs requests with responses under a
//! per-connection lock, and the [`client`] facade exposes typed reads and
//! writes on top of the eight raw Modbus operations. The [`value`] module
//! holds the register/value conversions and the [`poll`] module drives
//! periodic reads.
//!
//! ## Quick start
//!
//! ```no_run
//! use modbus_master::{ModbusMaster, ModbusTcpClient, RegisterArea, TcpSettings};
//!
//! #[tokio::main]
//! async fn main() -> modbus_master::ModbusResult<()> {
//!     let mut settings = TcpSettings::default();
//!     settings.host = "192.168.1.10".to_string();
//!
//!     let mut client = ModbusTcpClient::new(settings, 1);
//!     if !client.connect().await? {
//!         eprintln!("device not reachable");
//!         return Ok(());
//!     }
//!
//!     let voltage = client.read_f32(RegisterArea::Input, 0x0100).await?;
//!     println!("voltage: {voltage}");
//!
//!     client.write_u16(0x0010, 1500).await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod frame;
pub mod logging;
pub mod poll;
pub mod protocol;
pub mod settings;
pub mod transaction;
pub mod transport;
pub mod value;

pub use client::{GenericClient, ModbusMaster, ModbusRtuClient, ModbusTcpClient, RegisterArea};
pub use error::{ModbusError, ModbusResult};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};
pub use poll::Monitor;
pub use protocol::{
    ModbusAddress, ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId,
};
pub use settings::{
    BaudRate, DataBits, Parity, RetryPolicy, RtuSettings, StopBits, TcpSettings,
};
pub use transaction::Transaction;
pub use transport::{ModbusTransport, RtuTransport, TcpTransport, TransportStats};
pub use value::RegisterBits;

/// Default Modbus TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// MBAP header size in bytes (tid + pid + length + unit id).
pub const MBAP_HEADER_SIZE: usize = 7;

/// Largest legal Modbus TCP frame (MBAP header + 253-byte PDU).
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Largest legal Modbus RTU frame (address + 253-byte PDU + CRC).
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Maximum coils/discrete inputs per read request.
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum registers per read request.
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum coils per multiple-write request.
pub const MAX_COILS_PER_WRITE: u16 = 1968;

/// Maximum registers per multiple-write request.
pub const MAX_REGISTERS_PER_WRITE: u16 = 123;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
