//! Register/value codec: conversions between 16-bit register words and
//! typed application values.
//!
//! Layout rules, identical for every multi-register type:
//! most-significant register first, big-endian bytes within each register.
//! A 32-bit value 0x11223344 therefore occupies registers
//! `[0x1122, 0x3344]` and travels as bytes `11 22 33 44`.
//!
//! Element maxima derive from the 125-register read ceiling: 125 one-register
//! values, 62 two-register values, 31 four-register values, 250 bytes or
//! ASCII characters.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};

/// Maximum number of 1-register elements (i16/u16) per request.
pub const MAX_SINGLE_REGISTER_ELEMENTS: u16 = 125;
/// Maximum number of 2-register elements (i32/u32/f32) per request.
pub const MAX_DOUBLE_REGISTER_ELEMENTS: u16 = 62;
/// Maximum number of 4-register elements (i64/u64/f64) per request.
pub const MAX_QUAD_REGISTER_ELEMENTS: u16 = 31;
/// Maximum number of bytes or ASCII characters per request.
pub const MAX_BYTE_ELEMENTS: u16 = 250;

/// Reject an offset/length pair that overruns the 16-bit address space.
pub fn check_span(offset: u16, registers: u16) -> ModbusResult<()> {
    if registers == 0 || offset as u32 + registers as u32 > 65536 {
        return Err(ModbusError::invalid_address(offset, registers));
    }
    Ok(())
}

/// Reject an element count above the per-type maximum.
pub fn check_count(count: u16, max: u16, what: &str) -> ModbusResult<()> {
    if count == 0 || count > max {
        return Err(ModbusError::invalid_data(format!(
            "{} count {} outside 1..={}",
            what, count, max
        )));
    }
    Ok(())
}

/// Flatten register words to their wire byte representation.
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; registers.len() * 2];
    BigEndian::write_u16_into(registers, &mut bytes);
    bytes
}

/// Rebuild register words from wire bytes. The byte count must be even.
pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
    if bytes.len() % 2 != 0 {
        return Err(ModbusError::invalid_data(format!(
            "odd byte count {} cannot form registers",
            bytes.len()
        )));
    }
    let mut registers = vec![0u16; bytes.len() / 2];
    BigEndian::read_u16_into(bytes, &mut registers);
    Ok(registers)
}

fn need_registers(registers: &[u16], needed: usize, what: &str) -> ModbusResult<()> {
    if registers.len() < needed {
        return Err(ModbusError::invalid_data(format!(
            "{} needs {} registers, got {}",
            what,
            needed,
            registers.len()
        )));
    }
    Ok(())
}

macro_rules! numeric_codec {
    ($encode:ident, $decode:ident, $encode_array:ident, $decode_array:ident,
     $ty:ty, $bytes:expr, $regs:expr, $max:expr, $write:ident, $read:ident, $name:expr) => {
        #[doc = concat!("Encode a `", $name, "` into ", stringify!($regs), " register(s).")]
        pub fn $encode(value: $ty) -> [u16; $regs] {
            let mut buf = [0u8; $bytes];
            BigEndian::$write(&mut buf, value);
            let mut registers = [0u16; $regs];
            BigEndian::read_u16_into(&buf, &mut registers);
            registers
        }

        #[doc = concat!("Decode a `", $name, "` from the first ", stringify!($regs), " register(s).")]
        pub fn $decode(registers: &[u16]) -> ModbusResult<$ty> {
            need_registers(registers, $regs, $name)?;
            let mut buf = [0u8; $bytes];
            BigEndian::write_u16_into(&registers[..$regs], &mut buf);
            Ok(BigEndian::$read(&buf))
        }

        pub fn $encode_array(values: &[$ty]) -> ModbusResult<Vec<u16>> {
            check_count(values.len() as u16, $max, $name)?;
            let mut registers = Vec::with_capacity(values.len() * $regs);
            for &value in values {
                registers.extend_from_slice(&$encode(value));
            }
            Ok(registers)
        }

        pub fn $decode_array(registers: &[u16], count: usize) -> ModbusResult<Vec<$ty>> {
            check_count(count as u16, $max, $name)?;
            need_registers(registers, count * $regs, $name)?;
            let mut values = Vec::with_capacity(count);
            for chunk in registers[..count * $regs].chunks($regs) {
                values.push($decode(chunk)?);
            }
            Ok(values)
        }
    };
}

numeric_codec!(encode_i32, decode_i32, encode_i32_array, decode_i32_array,
    i32, 4, 2, MAX_DOUBLE_REGISTER_ELEMENTS, write_i32, read_i32, "i32");
numeric_codec!(encode_u32, decode_u32, encode_u32_array, decode_u32_array,
    u32, 4, 2, MAX_DOUBLE_REGISTER_ELEMENTS, write_u32, read_u32, "u32");
numeric_codec!(encode_f32, decode_f32, encode_f32_array, decode_f32_array,
    f32, 4, 2, MAX_DOUBLE_REGISTER_ELEMENTS, write_f32, read_f32, "f32");
numeric_codec!(encode_i64, decode_i64, encode_i64_array, decode_i64_array,
    i64, 8, 4, MAX_QUAD_REGISTER_ELEMENTS, write_i64, read_i64, "i64");
numeric_codec!(encode_u64, decode_u64, encode_u64_array, decode_u64_array,
    u64, 8, 4, MAX_QUAD_REGISTER_ELEMENTS, write_u64, read_u64, "u64");
numeric_codec!(encode_f64, decode_f64, encode_f64_array, decode_f64_array,
    f64, 8, 4, MAX_QUAD_REGISTER_ELEMENTS, write_f64, read_f64, "f64");

/// Encode an `i16` into one register.
pub fn encode_i16(value: i16) -> [u16; 1] {
    [value as u16]
}

/// Decode an `i16` from the first register.
pub fn decode_i16(registers: &[u16]) -> ModbusResult<i16> {
    need_registers(registers, 1, "i16")?;
    Ok(registers[0] as i16)
}

pub fn encode_i16_array(values: &[i16]) -> ModbusResult<Vec<u16>> {
    check_count(values.len() as u16, MAX_SINGLE_REGISTER_ELEMENTS, "i16")?;
    Ok(values.iter().map(|&v| v as u16).collect())
}

pub fn decode_i16_array(registers: &[u16], count: usize) -> ModbusResult<Vec<i16>> {
    check_count(count as u16, MAX_SINGLE_REGISTER_ELEMENTS, "i16")?;
    need_registers(registers, count, "i16")?;
    Ok(registers[..count].iter().map(|&r| r as i16).collect())
}

pub fn encode_u16_array(values: &[u16]) -> ModbusResult<Vec<u16>> {
    check_count(values.len() as u16, MAX_SINGLE_REGISTER_ELEMENTS, "u16")?;
    Ok(values.to_vec())
}

pub fn decode_u16_array(registers: &[u16], count: usize) -> ModbusResult<Vec<u16>> {
    check_count(count as u16, MAX_SINGLE_REGISTER_ELEMENTS, "u16")?;
    need_registers(registers, count, "u16")?;
    Ok(registers[..count].to_vec())
}

/// Encode raw bytes into registers, padding an odd tail byte with zero.
pub fn encode_bytes(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
    check_count(bytes.len() as u16, MAX_BYTE_ELEMENTS, "byte")?;
    let mut padded = bytes.to_vec();
    if padded.len() % 2 != 0 {
        padded.push(0);
    }
    bytes_to_registers(&padded)
}

/// Decode `count` raw bytes from registers.
pub fn decode_bytes(registers: &[u16], count: usize) -> ModbusResult<Vec<u8>> {
    check_count(count as u16, MAX_BYTE_ELEMENTS, "byte")?;
    need_registers(registers, (count + 1) / 2, "byte")?;
    let mut bytes = registers_to_bytes(registers);
    bytes.truncate(count);
    Ok(bytes)
}

/// Encode an ASCII string into registers, two characters per register.
pub fn encode_string(text: &str) -> ModbusResult<Vec<u16>> {
    if !text.is_ascii() {
        return Err(ModbusError::invalid_data("string is not ASCII"));
    }
    encode_bytes(text.as_bytes())
}

/// Decode `count` ASCII characters from registers.
pub fn decode_string(registers: &[u16], count: usize) -> ModbusResult<String> {
    let bytes = decode_bytes(registers, count)?;
    String::from_utf8(bytes)
        .map_err(|_| ModbusError::invalid_data("register data is not valid ASCII"))
}

/// Encode a hex-digit string ("1234ABCD") into the registers it describes.
pub fn encode_hex_string(text: &str) -> ModbusResult<Vec<u16>> {
    let bytes = hex::decode(text)
        .map_err(|e| ModbusError::invalid_data(format!("invalid hex string: {}", e)))?;
    encode_bytes(&bytes)
}

/// Decode `count` register bytes as an uppercase hex-digit string.
pub fn decode_hex_string(registers: &[u16], count: usize) -> ModbusResult<String> {
    let bytes = decode_bytes(registers, count)?;
    Ok(hex::encode_upper(bytes))
}

/// The 16 bits of a single register, addressable individually.
///
/// Bit-array access is limited to exactly one register per call; the count
/// check lives in the client facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterBits(pub u16);

impl RegisterBits {
    pub fn get(&self, index: usize) -> bool {
        index < 16 && (self.0 >> index) & 1 != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        if index < 16 {
            if value {
                self.0 |= 1 << index;
            } else {
                self.0 &= !(1 << index);
            }
        }
    }

    pub fn to_register(self) -> u16 {
        self.0
    }
}

impl From<u16> for RegisterBits {
    fn from(value: u16) -> Self {
        RegisterBits(value)
    }
}

impl fmt::Display for RegisterBits {
    /// Renders all 16 bits, most significant first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016b}", self.0)
    }
}
