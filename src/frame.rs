//! Wire-level frame codecs for Modbus RTU and Modbus TCP.
//!
//! Both codecs are pure functions over byte slices; no I/O happens here.
//! RTU frames are `[slave][fc][pdu data][crc lo][crc hi]` with CRC16
//! (polynomial 0xA001 reflected, init 0xFFFF) over everything before the
//! trailer. TCP frames prefix the PDU with the 7-byte MBAP header
//! `[tid:2][pid:2][len:2][unit:1]`.

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC16/MODBUS over the given bytes.
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Build the PDU (function code + data) shared by both transports.
fn encode_pdu(request: &ModbusRequest, out: &mut Vec<u8>) {
    out.push(request.function.to_u8());
    match request.function {
        ModbusFunction::ReadCoils
        | ModbusFunction::ReadDiscreteInputs
        | ModbusFunction::ReadHoldingRegisters
        | ModbusFunction::ReadInputRegisters => {
            out.extend_from_slice(&request.address.to_be_bytes());
            out.extend_from_slice(&request.quantity.to_be_bytes());
        }
        ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
            out.extend_from_slice(&request.address.to_be_bytes());
            out.extend_from_slice(&request.data);
        }
        ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
            out.extend_from_slice(&request.address.to_be_bytes());
            out.extend_from_slice(&request.quantity.to_be_bytes());
            out.push(request.data.len() as u8);
            out.extend_from_slice(&request.data);
        }
    }
}

/// Decode a response PDU (everything after the slave/unit id).
///
/// `expected` is the function code of the outstanding request; a success
/// response must echo it, an exception response carries it with the high
/// bit set.
fn decode_pdu(slave_id: u8, pdu: &[u8], expected: ModbusFunction) -> ModbusResult<ModbusResponse> {
    if pdu.is_empty() {
        return Err(ModbusError::frame("empty PDU"));
    }

    let fc = pdu[0];
    if fc == expected.to_u8() | 0x80 {
        if pdu.len() < 2 {
            return Err(ModbusError::frame("exception response missing code byte"));
        }
        return Ok(ModbusResponse::new_exception(slave_id, expected, pdu[1]));
    }

    if fc != expected.to_u8() {
        return Err(ModbusError::protocol(format!(
            "response function 0x{:02X} does not match request 0x{:02X}",
            fc,
            expected.to_u8()
        )));
    }

    Ok(ModbusResponse::new_success(
        slave_id,
        expected,
        pdu[1..].to_vec(),
    ))
}

/// Modbus RTU frame codec.
pub mod rtu {
    use super::*;

    /// Encode a request into a complete RTU frame with trailing CRC.
    pub fn encode_request(request: &ModbusRequest) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(crate::MAX_RTU_FRAME_SIZE);
        frame.push(request.slave_id);
        encode_pdu(request, &mut frame);

        if frame.len() + 2 > crate::MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::frame("RTU frame too large"));
        }

        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decode a complete RTU frame into a response, verifying the CRC.
    pub fn decode_response(
        frame: &[u8],
        expected: ModbusFunction,
    ) -> ModbusResult<ModbusResponse> {
        if frame.len() < 4 {
            return Err(ModbusError::frame(format!(
                "RTU frame too short: {} bytes",
                frame.len()
            )));
        }

        let (body, trailer) = frame.split_at(frame.len() - 2);
        let actual = u16::from_le_bytes([trailer[0], trailer[1]]);
        let computed = crc16(body);
        if actual != computed {
            return Err(ModbusError::crc_mismatch(computed, actual));
        }

        decode_pdu(body[0], &body[1..], expected)
    }
}

/// Modbus TCP (MBAP) frame codec.
pub mod tcp {
    use super::*;

    /// Encode a request into a complete MBAP frame with the given
    /// transaction id.
    pub fn encode_request(transaction_id: u16, request: &ModbusRequest) -> ModbusResult<Vec<u8>> {
        let mut pdu = Vec::with_capacity(crate::MAX_TCP_FRAME_SIZE);
        encode_pdu(request, &mut pdu);

        // MBAP length counts the unit id plus the PDU.
        let length = (pdu.len() + 1) as u16;

        let mut frame = Vec::with_capacity(7 + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(request.slave_id);
        frame.extend_from_slice(&pdu);

        if frame.len() > crate::MAX_TCP_FRAME_SIZE {
            return Err(ModbusError::frame("TCP frame too large"));
        }
        Ok(frame)
    }

    /// Decode a complete MBAP frame, returning the transaction id alongside
    /// the response so the transaction layer can match it.
    pub fn decode_response(
        frame: &[u8],
        expected: ModbusFunction,
    ) -> ModbusResult<(u16, ModbusResponse)> {
        if frame.len() < 9 {
            return Err(ModbusError::frame(format!(
                "MBAP frame too short: {} bytes",
                frame.len()
            )));
        }

        let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
        let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
        let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
        let unit_id = frame[6];

        if protocol_id != 0 {
            return Err(ModbusError::frame(format!(
                "unexpected MBAP protocol id {}",
                protocol_id
            )));
        }
        if length != frame.len() - 6 {
            return Err(ModbusError::frame(format!(
                "MBAP length field {} does not match frame body {}",
                length,
                frame.len() - 6
            )));
        }

        let response = decode_pdu(unit_id, &frame[7..], expected)?;
        Ok((transaction_id, response))
    }
}

/// Per-connection framing state: which codec to use and, for TCP, the next
/// transaction id to assign.
#[derive(Debug)]
pub enum Framing {
    Rtu,
    Tcp { next_transaction_id: u16 },
}

impl Framing {
    pub fn tcp() -> Self {
        Framing::Tcp {
            next_transaction_id: 1,
        }
    }

    /// Take the next TCP transaction id, wrapping and skipping 0.
    /// Returns 0 for RTU where no id exists.
    pub fn next_tid(&mut self) -> u16 {
        match self {
            Framing::Rtu => 0,
            Framing::Tcp {
                next_transaction_id,
            } => {
                let tid = *next_transaction_id;
                *next_transaction_id = next_transaction_id.wrapping_add(1);
                if *next_transaction_id == 0 {
                    *next_transaction_id = 1;
                }
                tid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModbusRequest;

    #[test]
    fn test_crc16_known_vector() {
        // Read 2 holding registers at 0 from slave 1.
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(crc16(&frame), 0xC40B);
    }

    #[test]
    fn test_rtu_encode_read() {
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2);
        let frame = rtu::encode_request(&request).unwrap();
        // CRC 0xC40B appended low byte first.
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0x0B, 0xC4]);
    }

    #[test]
    fn test_rtu_decode_response() {
        let mut frame = vec![0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let response =
            rtu::decode_response(&frame, ModbusFunction::ReadHoldingRegisters).unwrap();
        assert_eq!(response.slave_id, 1);
        assert_eq!(response.parse_registers().unwrap(), vec![0x1234, 0x5678]);
    }

    #[test]
    fn test_rtu_crc_mismatch() {
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2);
        let mut frame = rtu::encode_request(&request).unwrap();
        // Flip one payload bit.
        frame[3] ^= 0x01;

        let err = rtu::decode_response(&frame, ModbusFunction::ReadHoldingRegisters).unwrap_err();
        assert!(matches!(err, ModbusError::CrcMismatch { .. }));
    }

    #[test]
    fn test_rtu_exception_response() {
        let mut frame = vec![0x01, 0x83, 0x02];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let response =
            rtu::decode_response(&frame, ModbusFunction::ReadHoldingRegisters).unwrap();
        assert!(response.is_exception());
        assert_eq!(response.exception_code(), Some(0x02));
    }

    #[test]
    fn test_tcp_round_trip() {
        let request = ModbusRequest::new_read(0x11, ModbusFunction::ReadHoldingRegisters, 0x6B, 3);
        let frame = tcp::encode_request(0x1234, &request).unwrap();
        assert_eq!(
            frame,
            vec![0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );

        let reply = vec![
            0x12, 0x34, 0x00, 0x00, 0x00, 0x09, 0x11, 0x03, 0x06, 0x00, 0x01, 0x00, 0x02, 0x00,
            0x03,
        ];
        let (tid, response) =
            tcp::decode_response(&reply, ModbusFunction::ReadHoldingRegisters).unwrap();
        assert_eq!(tid, 0x1234);
        assert_eq!(response.slave_id, 0x11);
        assert_eq!(response.parse_registers().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_tcp_length_mismatch() {
        // Length field claims 9 but only 8 body bytes follow the header.
        let reply = vec![
            0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x11, 0x03, 0x06, 0x00, 0x01, 0x00, 0x02,
        ];
        let err = tcp::decode_response(&reply, ModbusFunction::ReadHoldingRegisters).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[test]
    fn test_tcp_encode_write_multiple() {
        let request = ModbusRequest::new_write(
            1,
            ModbusFunction::WriteMultipleRegisters,
            0x10,
            2,
            vec![0x00, 0x0A, 0x01, 0x02],
        );
        let frame = tcp::encode_request(1, &request).unwrap();
        assert_eq!(
            frame,
            vec![
                0x00, 0x01, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x10, 0x00, 0x10, 0x00, 0x02, 0x04,
                0x00, 0x0A, 0x01, 0x02
            ]
        );
    }

    #[test]
    fn test_tid_sequence_skips_zero() {
        let mut framing = Framing::Tcp {
            next_transaction_id: 0xFFFF,
        };
        assert_eq!(framing.next_tid(), 0xFFFF);
        assert_eq!(framing.next_tid(), 1);
        assert_eq!(framing.next_tid(), 2);
    }
}
