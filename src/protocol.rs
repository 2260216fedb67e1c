//! Core Modbus protocol definitions: function codes, exception codes, and
//! the request/response structures shared by both transports.
//!
//! TCP and RTU share the same application layer (the PDU: function code +
//! data); only the wire envelope differs. Everything in this module is
//! transport-independent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-based 16-bit offset).
pub type ModbusAddress = u16;

/// Slave/unit identifier on a bus (RTU) or behind a gateway (TCP).
///
/// The full 0-255 range is accepted; 0 is the RTU broadcast address and
/// 255 is commonly used by TCP devices that ignore the unit id.
pub type SlaveId = u8;

/// Supported Modbus function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::WriteSingleCoil
                | ModbusFunction::WriteSingleRegister
                | ModbusFunction::WriteMultipleCoils
                | ModbusFunction::WriteMultipleRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Standard Modbus exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::SlaveDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::SlaveDeviceBusy),
            0x07 => Some(ModbusException::NegativeAcknowledge),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Short standard name of the exception.
    pub fn name(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Illegal Function",
            ModbusException::IllegalDataAddress => "Illegal Data Address",
            ModbusException::IllegalDataValue => "Illegal Data Value",
            ModbusException::SlaveDeviceFailure => "Slave Device Failure",
            ModbusException::Acknowledge => "Acknowledge",
            ModbusException::SlaveDeviceBusy => "Slave Device Busy",
            ModbusException::NegativeAcknowledge => "Negative Acknowledge",
            ModbusException::MemoryParityError => "Memory Parity Error",
            ModbusException::GatewayPathUnavailable => "Gateway Path Unavailable",
            ModbusException::GatewayTargetDeviceFailedToRespond => {
                "Gateway Target Device Failed to Respond"
            }
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.name())
    }
}

/// A single Modbus request.
///
/// For write requests `data` carries the payload bytes (big-endian register
/// words, or packed coil bits) WITHOUT the byte-count prefix; the frame
/// codec adds the count on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// Create a read request.
    pub fn new_read(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Create a write request carrying `quantity` points and the payload.
    pub fn new_write(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
        data: Vec<u8>,
    ) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data,
        }
    }

    /// Validate protocol limits before any I/O.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.quantity == 0 {
            return Err(ModbusError::invalid_address(self.address, self.quantity));
        }

        // Offset + quantity must stay inside the 16-bit address space.
        if self.address as u32 + self.quantity as u32 > 65536 {
            return Err(ModbusError::invalid_address(self.address, self.quantity));
        }

        let limit = match self.function {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                crate::MAX_COILS_PER_REQUEST
            }
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                crate::MAX_REGISTERS_PER_REQUEST
            }
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 1,
            ModbusFunction::WriteMultipleCoils => crate::MAX_COILS_PER_WRITE,
            ModbusFunction::WriteMultipleRegisters => crate::MAX_REGISTERS_PER_WRITE,
        };

        if self.quantity > limit {
            return Err(ModbusError::invalid_address(self.address, self.quantity));
        }

        Ok(())
    }
}

/// A single Modbus response.
///
/// Either a success carrying the PDU data (for reads, the byte-count prefix
/// followed by payload bytes, exactly as on the wire) or a decoded exception.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
    pub exception: Option<ModbusException>,
}

impl ModbusResponse {
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
            exception: None,
        }
    }

    pub fn new_exception(slave_id: SlaveId, function: ModbusFunction, exception_code: u8) -> Self {
        Self {
            slave_id,
            function,
            data: vec![exception_code],
            exception: ModbusException::from_u8(exception_code),
        }
    }

    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Raw exception code of an exception response.
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.data.first().copied()
        } else {
            None
        }
    }

    /// Parse read-response data as 16-bit register words.
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        if let Some(exc) = self.exception {
            return Err(ModbusError::exception(self.function.to_u8(), exc.to_u8()));
        }

        if self.data.is_empty() {
            return Err(ModbusError::frame("empty response data"));
        }

        let byte_count = self.data[0] as usize;
        if self.data.len() < 1 + byte_count {
            return Err(ModbusError::frame("incomplete register data"));
        }
        if byte_count % 2 != 0 {
            return Err(ModbusError::frame("odd register data length"));
        }

        let mut registers = Vec::with_capacity(byte_count / 2);
        for chunk in self.data[1..1 + byte_count].chunks(2) {
            registers.push(u16::from_be_bytes([chunk[0], chunk[1]]));
        }

        Ok(registers)
    }

    /// Parse read-response data as packed bits, LSB of the first byte first.
    pub fn parse_bits(&self, count: usize) -> ModbusResult<Vec<bool>> {
        if let Some(exc) = self.exception {
            return Err(ModbusError::exception(self.function.to_u8(), exc.to_u8()));
        }

        if self.data.is_empty() {
            return Err(ModbusError::frame("empty response data"));
        }

        let byte_count = self.data[0] as usize;
        if self.data.len() < 1 + byte_count {
            return Err(ModbusError::frame("incomplete bit data"));
        }
        if byte_count * 8 < count {
            return Err(ModbusError::frame("bit data shorter than requested count"));
        }

        let mut bits = Vec::with_capacity(count);
        for i in 0..count {
            let byte = self.data[1 + i / 8];
            bits.push((byte >> (i % 8)) & 1 != 0);
        }

        Ok(bits)
    }
}

/// Pack boolean values into bytes, LSB first, trailing bits zero.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; (bits.len() + 7) / 8];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(
            ModbusFunction::from_u8(0x03).unwrap(),
            ModbusFunction::ReadHoldingRegisters
        );
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert!(ModbusFunction::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(
            ModbusException::from_u8(0x02).unwrap(),
            ModbusException::IllegalDataAddress
        );
        assert_eq!(
            ModbusException::from_u8(0x07).unwrap(),
            ModbusException::NegativeAcknowledge
        );
        assert_eq!(ModbusException::SlaveDeviceBusy.to_u8(), 0x06);
        assert!(ModbusException::from_u8(0x09).is_none());
    }

    #[test]
    fn test_request_validation() {
        let ok = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 100, 10);
        assert!(ok.validate().is_ok());

        let zero = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 100, 0);
        assert!(zero.validate().is_err());

        let too_many = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 100, 126);
        assert!(too_many.validate().is_err());

        let overflow = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 65530, 10);
        assert!(overflow.validate().is_err());

        // Broadcast and gateway addresses are legal slave ids.
        let broadcast = ModbusRequest::new_read(0, ModbusFunction::ReadCoils, 0, 1);
        assert!(broadcast.validate().is_ok());
        let gateway = ModbusRequest::new_read(255, ModbusFunction::ReadCoils, 0, 1);
        assert!(gateway.validate().is_ok());
    }

    #[test]
    fn test_response_parsing() {
        let register_data = vec![4, 0x12, 0x34, 0x56, 0x78];
        let response =
            ModbusResponse::new_success(1, ModbusFunction::ReadHoldingRegisters, register_data);
        assert_eq!(response.parse_registers().unwrap(), vec![0x1234, 0x5678]);

        let bit_data = vec![1, 0b0000_1010];
        let response = ModbusResponse::new_success(1, ModbusFunction::ReadCoils, bit_data);
        let bits = response.parse_bits(4).unwrap();
        assert_eq!(bits, vec![false, true, false, true]);
    }

    #[test]
    fn test_exception_response_parsing() {
        let response = ModbusResponse::new_exception(1, ModbusFunction::ReadHoldingRegisters, 0x02);
        assert!(response.is_exception());
        assert_eq!(response.exception_code(), Some(0x02));
        assert!(response.parse_registers().is_err());
    }

    #[test]
    fn test_pack_bits() {
        let bits = vec![true, false, true, true];
        assert_eq!(pack_bits(&bits), vec![0b0000_1101]);

        let nine = vec![true; 9];
        assert_eq!(pack_bits(&nine), vec![0xFF, 0x01]);
    }
}
