//! Client facade: the typed, user-facing master API.
//!
//! `ModbusMaster` declares the eight raw protocol operations and layers
//! the typed surface on top as default methods, so every implementor gets
//! the full typed API from the raw ops alone. Typed reads take a
//! [`RegisterArea`] selector to target holding or input registers; typed
//! writes always target holding registers because input registers are
//! read-only by definition.
//!
//! `ModbusTcpClient` and `ModbusRtuClient` hold mutable settings before
//! `connect`; connecting snapshots them into a transport, so later edits
//! take effect on the next reconnect only.

use async_trait::async_trait;
use tracing::info;

use crate::error::{ModbusError, ModbusResult};
use crate::frame::Framing;
use crate::logging::CallbackLogger;
use crate::protocol::{pack_bits, ModbusFunction, ModbusRequest, SlaveId};
use crate::settings::{RtuSettings, TcpSettings};
use crate::transaction::Transaction;
use crate::transport::{ModbusTransport, RtuTransport, TcpTransport, TransportStats};
use crate::value::{self, RegisterBits};

/// Which register file a typed read targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterArea {
    /// Read/write registers, function 0x03.
    Holding,
    /// Read-only registers, function 0x04.
    Input,
}

/// Typed Modbus master operations.
#[async_trait]
pub trait ModbusMaster: Send + Sync {
    async fn read_coils(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;
    async fn read_discrete_inputs(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;
    async fn read_holding_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;
    async fn read_input_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;
    async fn write_single_coil(&self, address: u16, value: bool) -> ModbusResult<()>;
    async fn write_single_register(&self, address: u16, value: u16) -> ModbusResult<()>;
    async fn write_multiple_coils(&self, address: u16, values: &[bool]) -> ModbusResult<()>;
    async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> ModbusResult<()>;

    /// Read registers from the selected area.
    async fn read_registers(
        &self,
        area: RegisterArea,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        match area {
            RegisterArea::Holding => self.read_holding_registers(address, quantity).await,
            RegisterArea::Input => self.read_input_registers(address, quantity).await,
        }
    }

    // 16-bit values.

    async fn read_u16(&self, area: RegisterArea, address: u16) -> ModbusResult<u16> {
        let registers = self.read_registers(area, address, 1).await?;
        registers
            .first()
            .copied()
            .ok_or_else(|| ModbusError::frame("missing register in response"))
    }

    async fn read_i16(&self, area: RegisterArea, address: u16) -> ModbusResult<i16> {
        Ok(self.read_u16(area, address).await? as i16)
    }

    async fn read_u16_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        value::check_count(count, value::MAX_SINGLE_REGISTER_ELEMENTS, "u16")?;
        value::check_span(address, count)?;
        let registers = self.read_registers(area, address, count).await?;
        value::decode_u16_array(&registers, count as usize)
    }

    async fn read_i16_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<i16>> {
        value::check_count(count, value::MAX_SINGLE_REGISTER_ELEMENTS, "i16")?;
        value::check_span(address, count)?;
        let registers = self.read_registers(area, address, count).await?;
        value::decode_i16_array(&registers, count as usize)
    }

    async fn write_u16(&self, address: u16, value: u16) -> ModbusResult<()> {
        self.write_single_register(address, value).await
    }

    async fn write_i16(&self, address: u16, value: i16) -> ModbusResult<()> {
        self.write_single_register(address, value as u16).await
    }

    async fn write_u16_array(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let registers = value::encode_u16_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    async fn write_i16_array(&self, address: u16, values: &[i16]) -> ModbusResult<()> {
        let registers = value::encode_i16_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    // 32-bit values, two registers each.

    async fn read_u32(&self, area: RegisterArea, address: u16) -> ModbusResult<u32> {
        let registers = self.read_registers(area, address, 2).await?;
        value::decode_u32(&registers)
    }

    async fn read_i32(&self, area: RegisterArea, address: u16) -> ModbusResult<i32> {
        let registers = self.read_registers(area, address, 2).await?;
        value::decode_i32(&registers)
    }

    async fn read_f32(&self, area: RegisterArea, address: u16) -> ModbusResult<f32> {
        let registers = self.read_registers(area, address, 2).await?;
        value::decode_f32(&registers)
    }

    async fn read_u32_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u32>> {
        value::check_count(count, value::MAX_DOUBLE_REGISTER_ELEMENTS, "u32")?;
        value::check_span(address, count * 2)?;
        let registers = self.read_registers(area, address, count * 2).await?;
        value::decode_u32_array(&registers, count as usize)
    }

    async fn read_i32_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<i32>> {
        value::check_count(count, value::MAX_DOUBLE_REGISTER_ELEMENTS, "i32")?;
        value::check_span(address, count * 2)?;
        let registers = self.read_registers(area, address, count * 2).await?;
        value::decode_i32_array(&registers, count as usize)
    }

    async fn read_f32_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<f32>> {
        value::check_count(count, value::MAX_DOUBLE_REGISTER_ELEMENTS, "f32")?;
        value::check_span(address, count * 2)?;
        let registers = self.read_registers(area, address, count * 2).await?;
        value::decode_f32_array(&registers, count as usize)
    }

    async fn write_u32(&self, address: u16, value: u32) -> ModbusResult<()> {
        self.write_multiple_registers(address, &value::encode_u32(value))
            .await
    }

    async fn write_i32(&self, address: u16, value: i32) -> ModbusResult<()> {
        self.write_multiple_registers(address, &value::encode_i32(value))
            .await
    }

    async fn write_f32(&self, address: u16, value: f32) -> ModbusResult<()> {
        self.write_multiple_registers(address, &value::encode_f32(value))
            .await
    }

    async fn write_u32_array(&self, address: u16, values: &[u32]) -> ModbusResult<()> {
        let registers = value::encode_u32_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    async fn write_i32_array(&self, address: u16, values: &[i32]) -> ModbusResult<()> {
        let registers = value::encode_i32_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    async fn write_f32_array(&self, address: u16, values: &[f32]) -> ModbusResult<()> {
        let registers = value::encode_f32_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    // 64-bit values, four registers each.

    async fn read_u64(&self, area: RegisterArea, address: u16) -> ModbusResult<u64> {
        let registers = self.read_registers(area, address, 4).await?;
        value::decode_u64(&registers)
    }

    async fn read_i64(&self, area: RegisterArea, address: u16) -> ModbusResult<i64> {
        let registers = self.read_registers(area, address, 4).await?;
        value::decode_i64(&registers)
    }

    async fn read_f64(&self, area: RegisterArea, address: u16) -> ModbusResult<f64> {
        let registers = self.read_registers(area, address, 4).await?;
        value::decode_f64(&registers)
    }

    async fn read_u64_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u64>> {
        value::check_count(count, value::MAX_QUAD_REGISTER_ELEMENTS, "u64")?;
        value::check_span(address, count * 4)?;
        let registers = self.read_registers(area, address, count * 4).await?;
        value::decode_u64_array(&registers, count as usize)
    }

    async fn read_i64_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<i64>> {
        value::check_count(count, value::MAX_QUAD_REGISTER_ELEMENTS, "i64")?;
        value::check_span(address, count * 4)?;
        let registers = self.read_registers(area, address, count * 4).await?;
        value::decode_i64_array(&registers, count as usize)
    }

    async fn read_f64_array(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<f64>> {
        value::check_count(count, value::MAX_QUAD_REGISTER_ELEMENTS, "f64")?;
        value::check_span(address, count * 4)?;
        let registers = self.read_registers(area, address, count * 4).await?;
        value::decode_f64_array(&registers, count as usize)
    }

    async fn write_u64(&self, address: u16, value: u64) -> ModbusResult<()> {
        self.write_multiple_registers(address, &value::encode_u64(value))
            .await
    }

    async fn write_i64(&self, address: u16, value: i64) -> ModbusResult<()> {
        self.write_multiple_registers(address, &value::encode_i64(value))
            .await
    }

    async fn write_f64(&self, address: u16, value: f64) -> ModbusResult<()> {
        self.write_multiple_registers(address, &value::encode_f64(value))
            .await
    }

    async fn write_u64_array(&self, address: u16, values: &[u64]) -> ModbusResult<()> {
        let registers = value::encode_u64_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    async fn write_i64_array(&self, address: u16, values: &[i64]) -> ModbusResult<()> {
        let registers = value::encode_i64_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    async fn write_f64_array(&self, address: u16, values: &[f64]) -> ModbusResult<()> {
        let registers = value::encode_f64_array(values)?;
        self.write_multiple_registers(address, &registers).await
    }

    // Bytes, strings and register bits.

    async fn read_bytes(
        &self,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u8>> {
        value::check_count(count, value::MAX_BYTE_ELEMENTS, "byte")?;
        let registers_needed = (count + 1) / 2;
        value::check_span(address, registers_needed)?;
        let registers = self.read_registers(area, address, registers_needed).await?;
        value::decode_bytes(&registers, count as usize)
    }

    async fn read_string(
        &self,
        area: RegisterArea,
        address: u16,
        characters: u16,
    ) -> ModbusResult<String> {
        value::check_count(characters, value::MAX_BYTE_ELEMENTS, "character")?;
        let registers_needed = (characters + 1) / 2;
        value::check_span(address, registers_needed)?;
        let registers = self.read_registers(area, address, registers_needed).await?;
        value::decode_string(&registers, characters as usize)
    }

    async fn read_hex_string(
        &self,
        area: RegisterArea,
        address: u16,
        bytes: u16,
    ) -> ModbusResult<String> {
        value::check_count(bytes, value::MAX_BYTE_ELEMENTS, "byte")?;
        let registers_needed = (bytes + 1) / 2;
        value::check_span(address, registers_needed)?;
        let registers = self.read_registers(area, address, registers_needed).await?;
        value::decode_hex_string(&registers, bytes as usize)
    }

    /// Read the 16 bits of a single register.
    async fn read_bits(&self, area: RegisterArea, address: u16) -> ModbusResult<RegisterBits> {
        Ok(RegisterBits(self.read_u16(area, address).await?))
    }

    async fn write_bytes(&self, address: u16, bytes: &[u8]) -> ModbusResult<()> {
        let registers = value::encode_bytes(bytes)?;
        self.write_multiple_registers(address, &registers).await
    }

    async fn write_string(&self, address: u16, text: &str) -> ModbusResult<()> {
        let registers = value::encode_string(text)?;
        self.write_multiple_registers(address, &registers).await
    }

    async fn write_hex_string(&self, address: u16, text: &str) -> ModbusResult<()> {
        let registers = value::encode_hex_string(text)?;
        self.write_multiple_registers(address, &registers).await
    }

    /// Write the 16 bits of a single register.
    async fn write_bits(&self, address: u16, bits: RegisterBits) -> ModbusResult<()> {
        self.write_single_register(address, bits.to_register()).await
    }
}

/// Transport-generic master engine; the concrete clients wrap this.
pub struct GenericClient<T: ModbusTransport> {
    slave_id: SlaveId,
    transaction: Transaction<T>,
    logger: CallbackLogger,
}

impl<T: ModbusTransport> GenericClient<T> {
    pub fn new(slave_id: SlaveId, transaction: Transaction<T>) -> Self {
        Self {
            slave_id,
            transaction,
            logger: CallbackLogger::disabled(),
        }
    }

    /// Attach an exchange logger. The default logs nothing.
    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.logger = logger;
    }

    async fn run(&self, request: ModbusRequest) -> ModbusResult<crate::protocol::ModbusResponse> {
        self.logger.log_request(&request);
        let response = self.transaction.execute(&request).await?;
        self.logger.log_response(&response);
        Ok(response)
    }

    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    pub async fn connect(&self) -> ModbusResult<bool> {
        self.transaction.connect().await
    }

    pub async fn disconnect(&self) -> ModbusResult<()> {
        self.transaction.disconnect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.transaction.is_connected().await
    }

    pub async fn stats(&self) -> TransportStats {
        self.transaction.stats().await
    }
}

#[async_trait]
impl<T: ModbusTransport> ModbusMaster for GenericClient<T> {
    async fn read_coils(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let request =
            ModbusRequest::new_read(self.slave_id, ModbusFunction::ReadCoils, address, quantity);
        let response = self.run(request).await?;
        response.parse_bits(quantity as usize)
    }

    async fn read_discrete_inputs(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let request = ModbusRequest::new_read(
            self.slave_id,
            ModbusFunction::ReadDiscreteInputs,
            address,
            quantity,
        );
        let response = self.run(request).await?;
        response.parse_bits(quantity as usize)
    }

    async fn read_holding_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::new_read(
            self.slave_id,
            ModbusFunction::ReadHoldingRegisters,
            address,
            quantity,
        );
        let response = self.run(request).await?;
        response.parse_registers()
    }

    async fn read_input_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::new_read(
            self.slave_id,
            ModbusFunction::ReadInputRegisters,
            address,
            quantity,
        );
        let response = self.run(request).await?;
        response.parse_registers()
    }

    async fn write_single_coil(&self, address: u16, value: bool) -> ModbusResult<()> {
        let data = if value {
            vec![0xFF, 0x00]
        } else {
            vec![0x00, 0x00]
        };
        let request = ModbusRequest::new_write(
            self.slave_id,
            ModbusFunction::WriteSingleCoil,
            address,
            1,
            data,
        );
        self.run(request).await?;
        Ok(())
    }

    async fn write_single_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        let request = ModbusRequest::new_write(
            self.slave_id,
            ModbusFunction::WriteSingleRegister,
            address,
            1,
            value.to_be_bytes().to_vec(),
        );
        self.run(request).await?;
        Ok(())
    }

    async fn write_multiple_coils(&self, address: u16, values: &[bool]) -> ModbusResult<()> {
        let request = ModbusRequest::new_write(
            self.slave_id,
            ModbusFunction::WriteMultipleCoils,
            address,
            values.len() as u16,
            pack_bits(values),
        );
        self.run(request).await?;
        Ok(())
    }

    async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let request = ModbusRequest::new_write(
            self.slave_id,
            ModbusFunction::WriteMultipleRegisters,
            address,
            values.len() as u16,
            value::registers_to_bytes(values),
        );
        self.run(request).await?;
        Ok(())
    }
}

macro_rules! delegate_raw_ops {
    ($client:ty) => {
        #[async_trait]
        impl ModbusMaster for $client {
            async fn read_coils(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
                self.engine()?.read_coils(address, quantity).await
            }

            async fn read_discrete_inputs(
                &self,
                address: u16,
                quantity: u16,
            ) -> ModbusResult<Vec<bool>> {
                self.engine()?.read_discrete_inputs(address, quantity).await
            }

            async fn read_holding_registers(
                &self,
                address: u16,
                quantity: u16,
            ) -> ModbusResult<Vec<u16>> {
                self.engine()?
                    .read_holding_registers(address, quantity)
                    .await
            }

            async fn read_input_registers(
                &self,
                address: u16,
                quantity: u16,
            ) -> ModbusResult<Vec<u16>> {
                self.engine()?.read_input_registers(address, quantity).await
            }

            async fn write_single_coil(&self, address: u16, value: bool) -> ModbusResult<()> {
                self.engine()?.write_single_coil(address, value).await
            }

            async fn write_single_register(&self, address: u16, value: u16) -> ModbusResult<()> {
                self.engine()?.write_single_register(address, value).await
            }

            async fn write_multiple_coils(
                &self,
                address: u16,
                values: &[bool],
            ) -> ModbusResult<()> {
                self.engine()?.write_multiple_coils(address, values).await
            }

            async fn write_multiple_registers(
                &self,
                address: u16,
                values: &[u16],
            ) -> ModbusResult<()> {
                self.engine()?
                    .write_multiple_registers(address, values)
                    .await
            }
        }
    };
}

/// Modbus TCP master client.
pub struct ModbusTcpClient {
    /// Settings for the NEXT connect; edits while connected are inert
    /// until reconnect.
    pub settings: TcpSettings,
    slave_id: SlaveId,
    inner: Option<GenericClient<TcpTransport>>,
}

impl ModbusTcpClient {
    pub fn new(settings: TcpSettings, slave_id: SlaveId) -> Self {
        Self {
            settings,
            slave_id,
            inner: None,
        }
    }

    fn engine(&self) -> ModbusResult<&GenericClient<TcpTransport>> {
        self.inner
            .as_ref()
            .ok_or_else(|| ModbusError::connection("not connected"))
    }

    /// Connect using a snapshot of the current settings. `Ok(false)` means
    /// the device could not be reached.
    pub async fn connect(&mut self) -> ModbusResult<bool> {
        self.disconnect().await?;

        let settings = self.settings.clone();
        let response_timeout = settings.receive_timeout();
        let retry = settings.retry;
        let transaction = Transaction::new(
            TcpTransport::new(settings),
            Framing::tcp(),
            response_timeout,
            retry,
        );

        if !transaction.connect().await? {
            return Ok(false);
        }

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            slave_id = self.slave_id,
            "TCP master connected"
        );
        self.inner = Some(GenericClient::new(self.slave_id, transaction));
        Ok(true)
    }

    /// Disconnect; safe to call at any time, including after a failure.
    pub async fn disconnect(&mut self) -> ModbusResult<()> {
        if let Some(inner) = self.inner.take() {
            inner.disconnect().await?;
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.is_connected().await,
            None => false,
        }
    }

    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    pub fn set_slave_id(&mut self, slave_id: SlaveId) {
        self.slave_id = slave_id;
    }

    pub async fn stats(&self) -> ModbusResult<TransportStats> {
        Ok(self.engine()?.stats().await)
    }
}

delegate_raw_ops!(ModbusTcpClient);

/// Modbus RTU master client.
pub struct ModbusRtuClient {
    /// Settings for the NEXT connect; edits while connected are inert
    /// until reconnect.
    pub settings: RtuSettings,
    slave_id: SlaveId,
    inner: Option<GenericClient<RtuTransport>>,
}

impl ModbusRtuClient {
    pub fn new(settings: RtuSettings, slave_id: SlaveId) -> Self {
        Self {
            settings,
            slave_id,
            inner: None,
        }
    }

    fn engine(&self) -> ModbusResult<&GenericClient<RtuTransport>> {
        self.inner
            .as_ref()
            .ok_or_else(|| ModbusError::connection("not connected"))
    }

    /// Connect using a snapshot of the current settings. `Ok(false)` means
    /// the serial port could not be opened; unrealizable serial parameters
    /// are a `Configuration` error.
    pub async fn connect(&mut self) -> ModbusResult<bool> {
        self.disconnect().await?;

        let settings = self.settings.clone();
        let response_timeout = settings.read_timeout();
        let retry = settings.retry;
        let transaction = Transaction::new(
            RtuTransport::new(settings),
            Framing::Rtu,
            response_timeout,
            retry,
        );

        if !transaction.connect().await? {
            return Ok(false);
        }

        info!(
            port = %self.settings.port,
            baud = self.settings.baud_rate.as_u32(),
            slave_id = self.slave_id,
            "RTU master connected"
        );
        self.inner = Some(GenericClient::new(self.slave_id, transaction));
        Ok(true)
    }

    /// Disconnect; safe to call at any time, including after a failure.
    pub async fn disconnect(&mut self) -> ModbusResult<()> {
        if let Some(inner) = self.inner.take() {
            inner.disconnect().await?;
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.is_connected().await,
            None => false,
        }
    }

    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    pub fn set_slave_id(&mut self, slave_id: SlaveId) {
        self.slave_id = slave_id;
    }

    pub async fn stats(&self) -> ModbusResult<TransportStats> {
        Ok(self.engine()?.stats().await)
    }
}

delegate_raw_ops!(ModbusRtuClient);
