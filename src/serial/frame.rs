use crate::common::buffer::ReadBuffer;
use crate::common::frame::{constants, Frame, FrameHeader};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::pdu::FunctionCode;
use crate::types::UnitId;

pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
pub(crate) const CRC_LENGTH: usize = 2;

pub(crate) const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// Compute the Modbus CRC-16 over `unit_id` followed by the PDU bytes
pub(crate) fn calc_crc(unit_id: UnitId, pdu: &[u8]) -> u16 {
    let mut digest = CRC.digest();
    digest.update(&[unit_id.value]);
    digest.update(pdu);
    digest.finalize()
}

#[derive(Clone, Copy)]
enum ParserType {
    Request,
    Response,
}

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    // unit id and the length of the body following the function code
    ReadFullBody(UnitId, usize),
    // unit id and how many bytes to read before the trailing u8 length field
    ReadToOffsetForLength(UnitId, usize),
    // unit id; the two bytes after the function code form a u16 length field
    ReadToWideOffsetForLength(UnitId),
    // unit id; device identification responses carry self-describing objects
    ReadDeviceIdBody(UnitId),
}

#[derive(Clone, Copy)]
enum LengthMode {
    /// The body length after the function code is fixed
    Fixed(usize),
    /// Read this many more bytes; the last of them is a u8 count of the bytes after it
    Offset(usize),
    /// The two bytes after the function code form a u16 count of the bytes after them
    WideOffset,
    /// The body is a sequence of length-prefixed identification objects
    DeviceId,
    /// Unknown function code, the frame length cannot be determined
    Unknown,
}

pub(crate) struct RtuParser {
    state: ParseState,
    parser_type: ParserType,
}

impl RtuParser {
    pub(crate) fn new_request_parser() -> Self {
        Self {
            state: ParseState::Start,
            parser_type: ParserType::Request,
        }
    }

    pub(crate) fn new_response_parser() -> Self {
        Self {
            state: ParseState::Start,
            parser_type: ParserType::Response,
        }
    }

    // Returns how to calculate the length of the body following the function code
    fn length_mode(&self, raw_function_code: u8) -> LengthMode {
        // exception responses carry a single code byte
        if matches!(self.parser_type, ParserType::Response) && raw_function_code & 0x80 != 0 {
            return LengthMode::Fixed(1);
        }

        let function_code = match FunctionCode::get(raw_function_code) {
            Some(code) => code,
            None => return LengthMode::Unknown,
        };

        match self.parser_type {
            ParserType::Request => match function_code {
                FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
                | FunctionCode::WriteSingleCoil
                | FunctionCode::WriteSingleRegister
                | FunctionCode::Diagnostics => LengthMode::Fixed(4),
                FunctionCode::ReadExceptionStatus
                | FunctionCode::GetCommEventCounter
                | FunctionCode::GetCommEventLog
                | FunctionCode::ReportServerId => LengthMode::Fixed(0),
                FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                    LengthMode::Offset(5)
                }
                FunctionCode::ReadFileRecord | FunctionCode::WriteFileRecord => {
                    LengthMode::Offset(1)
                }
                FunctionCode::MaskWriteRegister => LengthMode::Fixed(6),
                FunctionCode::ReadWriteMultipleRegisters => LengthMode::Offset(9),
                FunctionCode::ReadFifoQueue => LengthMode::Fixed(2),
                FunctionCode::EncapsulatedInterface => LengthMode::Fixed(3),
            },
            ParserType::Response => match function_code {
                FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
                | FunctionCode::GetCommEventLog
                | FunctionCode::ReportServerId
                | FunctionCode::ReadFileRecord
                | FunctionCode::WriteFileRecord
                | FunctionCode::ReadWriteMultipleRegisters => LengthMode::Offset(1),
                FunctionCode::WriteSingleCoil
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleCoils
                | FunctionCode::WriteMultipleRegisters
                | FunctionCode::Diagnostics
                | FunctionCode::GetCommEventCounter => LengthMode::Fixed(4),
                FunctionCode::ReadExceptionStatus => LengthMode::Fixed(1),
                FunctionCode::MaskWriteRegister => LengthMode::Fixed(6),
                FunctionCode::ReadFifoQueue => LengthMode::WideOffset,
                FunctionCode::EncapsulatedInterface => LengthMode::DeviceId,
            },
        }
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if cursor.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(cursor.read_u8()?);
                // the function code is not consumed to avoid a copy later on
                let raw_function_code = cursor.peek_at(0)?;

                self.state = match self.length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(unit_id, length),
                    LengthMode::Offset(offset) => {
                        ParseState::ReadToOffsetForLength(unit_id, offset)
                    }
                    LengthMode::WideOffset => ParseState::ReadToWideOffsetForLength(unit_id),
                    LengthMode::DeviceId => ParseState::ReadDeviceIdBody(unit_id),
                    LengthMode::Unknown => {
                        return Err(RequestError::BadFrame(
                            FrameParseError::UnknownFunctionCode(raw_function_code),
                        ))
                    }
                };

                self.parse(cursor, decode)
            }
            ParseState::ReadToOffsetForLength(unit_id, offset) => {
                if cursor.len() < FUNCTION_CODE_LENGTH + offset {
                    return Ok(None);
                }

                let extra_bytes_to_read =
                    cursor.peek_at(FUNCTION_CODE_LENGTH + offset - 1)? as usize;
                self.state = ParseState::ReadFullBody(unit_id, offset + extra_bytes_to_read);

                self.parse(cursor, decode)
            }
            ParseState::ReadToWideOffsetForLength(unit_id) => {
                if cursor.len() < FUNCTION_CODE_LENGTH + 2 {
                    return Ok(None);
                }

                let high = cursor.peek_at(FUNCTION_CODE_LENGTH)? as usize;
                let low = cursor.peek_at(FUNCTION_CODE_LENGTH + 1)? as usize;
                let extra_bytes_to_read = (high << 8) | low;
                self.state = ParseState::ReadFullBody(unit_id, 2 + extra_bytes_to_read);

                self.parse(cursor, decode)
            }
            ParseState::ReadDeviceIdBody(unit_id) => {
                // fc, mei type, read code, conformity, more follows, next object id, count
                const OBJECTS_START: usize = 7;
                if cursor.len() < OBJECTS_START {
                    return Ok(None);
                }

                let object_count = cursor.peek_at(6)? as usize;
                let mut offset = OBJECTS_START;
                for _ in 0..object_count {
                    if cursor.len() < offset + 2 {
                        return Ok(None);
                    }
                    let object_length = cursor.peek_at(offset + 1)? as usize;
                    offset += 2 + object_length;
                }
                if cursor.len() < offset {
                    return Ok(None);
                }

                self.state = ParseState::ReadFullBody(unit_id, offset - FUNCTION_CODE_LENGTH);
                self.parse(cursor, decode)
            }
            ParseState::ReadFullBody(unit_id, length) => {
                if FUNCTION_CODE_LENGTH + length > constants::MAX_PDU_SIZE {
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        FUNCTION_CODE_LENGTH + length,
                        constants::MAX_PDU_SIZE,
                    )));
                }

                if cursor.len() < FUNCTION_CODE_LENGTH + length + CRC_LENGTH {
                    return Ok(None);
                }

                let frame = {
                    let data = cursor.read(FUNCTION_CODE_LENGTH + length)?;
                    let mut frame = Frame::new(FrameHeader::new_serial(unit_id));
                    frame.set(data);
                    frame
                };
                let received_crc = cursor.read_u16_le()?;

                let expected_crc = calc_crc(unit_id, frame.payload());
                if received_crc != expected_crc {
                    return Err(RequestError::BadFrame(
                        FrameParseError::CrcValidationFailure(received_crc, expected_crc),
                    ));
                }

                if decode.enabled() {
                    tracing::info!(
                        "RTU RX - {}",
                        RtuDisplay::new(decode, unit_id, frame.payload(), received_crc)
                    );
                }

                self.state = ParseState::Start;
                Ok(Some(frame))
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
    }
}

pub(crate) struct RtuFormatter {
    buffer: [u8; constants::MAX_RTU_FRAME_SIZE],
}

impl RtuFormatter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; constants::MAX_RTU_FRAME_SIZE],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        pdu: &[u8],
        decode: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        if 1 + pdu.len() + CRC_LENGTH > constants::MAX_RTU_FRAME_SIZE {
            return Err(crate::error::InternalError::AduTooBig(pdu.len()).into());
        }

        self.buffer[0] = header.unit_id.value;
        self.buffer[1..1 + pdu.len()].copy_from_slice(pdu);

        let crc = calc_crc(header.unit_id, pdu);
        let end = 1 + pdu.len();
        self.buffer[end] = crc as u8;
        self.buffer[end + 1] = (crc >> 8) as u8;

        if decode.enabled() {
            tracing::info!(
                "RTU TX - {}",
                RtuDisplay::new(decode, header.unit_id, pdu, crc)
            );
        }

        Ok(&self.buffer[..end + CRC_LENGTH])
    }
}

struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    address: UnitId,
    data: &'a [u8],
    crc: u16,
}

impl<'a> RtuDisplay<'a> {
    fn new(level: FrameDecodeLevel, address: UnitId, data: &'a [u8], crc: u16) -> Self {
        RtuDisplay {
            level,
            address,
            data,
            crc,
        }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "address: {} crc: {:#06X} (len = {})",
            self.address,
            self.crc,
            self.data.len(),
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::FramedReader;
    use crate::common::phys::PhysLayer;
    use crate::decode::PhysDecodeLevel;
    use tokio::io::AsyncWriteExt;

    // read holding registers, addr 0, qty 1, to unit 1
    const READ_REQUEST: &[u8] = &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];

    async fn parse(
        reader: &mut FramedReader,
        chunks: &[&[u8]],
    ) -> Result<Frame, RequestError> {
        let (client, server) = tokio::io::duplex(1024);
        let mut layer = PhysLayer::new_mock(server, PhysDecodeLevel::Nothing);

        let mut writer = client;
        for chunk in chunks {
            writer.write_all(chunk).await.unwrap();
        }
        drop(writer);

        reader.next_frame(&mut layer, FrameDecodeLevel::Nothing).await
    }

    #[test]
    fn computes_the_reference_crc() {
        // the Modbus specification's reference vector for 01 03 00 00 00 01
        assert_eq!(
            calc_crc(UnitId::new(0x01), &[0x03, 0x00, 0x00, 0x00, 0x01]),
            0x0A84
        );
    }

    #[test]
    fn incremental_crc_matches_one_pass() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(calc_crc(UnitId::new(0x01), &frame[1..]), CRC.checksum(&frame));
    }

    #[tokio::test]
    async fn parses_fixed_length_request() {
        let frame = parse(&mut FramedReader::rtu_request(), &[READ_REQUEST])
            .await
            .unwrap();
        assert_eq!(frame.header.unit_id, UnitId::new(0x01));
        assert_eq!(frame.payload(), &READ_REQUEST[1..6]);
    }

    #[tokio::test]
    async fn parses_request_split_across_reads() {
        let (f1, f2) = READ_REQUEST.split_at(3);
        let frame = parse(&mut FramedReader::rtu_request(), &[f1, f2])
            .await
            .unwrap();
        assert_eq!(frame.payload(), &READ_REQUEST[1..6]);
    }

    #[tokio::test]
    async fn rejects_corrupted_crc() {
        let mut corrupted = READ_REQUEST.to_vec();
        corrupted[3] ^= 0x01;
        let err = parse(&mut FramedReader::rtu_request(), &[&corrupted])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::BadFrame(FrameParseError::CrcValidationFailure(_, _))
        ));
    }

    #[tokio::test]
    async fn every_single_bit_flip_fails_crc_validation() {
        for byte in 0..6 {
            for bit in 0..8 {
                let mut corrupted = READ_REQUEST.to_vec();
                corrupted[byte] ^= 1 << bit;
                let result = parse(&mut FramedReader::rtu_request(), &[&corrupted]).await;
                assert!(result.is_err(), "flip of byte {byte} bit {bit} was accepted");
            }
        }
    }

    #[tokio::test]
    async fn parses_variable_length_response() {
        // read coils response with 1 data byte
        let pdu = [0x01, 0x01, 0x05];
        let crc = calc_crc(UnitId::new(0x0B), &pdu);
        let mut wire = vec![0x0B];
        wire.extend_from_slice(&pdu);
        wire.push(crc as u8);
        wire.push((crc >> 8) as u8);

        let frame = parse(&mut FramedReader::rtu_response(), &[&wire])
            .await
            .unwrap();
        assert_eq!(frame.header.unit_id, UnitId::new(0x0B));
        assert_eq!(frame.payload(), &pdu);
    }

    #[tokio::test]
    async fn parses_exception_response() {
        let pdu = [0x83, 0x02];
        let crc = calc_crc(UnitId::new(0x01), &pdu);
        let mut wire = vec![0x01];
        wire.extend_from_slice(&pdu);
        wire.push(crc as u8);
        wire.push((crc >> 8) as u8);

        let frame = parse(&mut FramedReader::rtu_response(), &[&wire])
            .await
            .unwrap();
        assert_eq!(frame.payload(), &pdu);
    }

    #[tokio::test]
    async fn parses_fifo_response_with_wide_byte_count() {
        let pdu = [0x18, 0x00, 0x06, 0x00, 0x02, 0x01, 0xB8, 0x12, 0x84];
        let crc = calc_crc(UnitId::new(0x04), &pdu);
        let mut wire = vec![0x04];
        wire.extend_from_slice(&pdu);
        wire.push(crc as u8);
        wire.push((crc >> 8) as u8);

        let frame = parse(&mut FramedReader::rtu_response(), &[&wire])
            .await
            .unwrap();
        assert_eq!(frame.payload(), &pdu);
    }

    #[tokio::test]
    async fn parses_device_identification_response() {
        let mut pdu = vec![0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x01];
        pdu.extend_from_slice(&[0x00, 0x04]);
        pdu.extend_from_slice(b"Acme");
        let crc = calc_crc(UnitId::new(0x01), &pdu);
        let mut wire = vec![0x01];
        wire.extend_from_slice(&pdu);
        wire.push(crc as u8);
        wire.push((crc >> 8) as u8);

        // feed in two chunks to exercise the object walker restarting
        let (f1, f2) = wire.split_at(9);
        let frame = parse(&mut FramedReader::rtu_response(), &[f1, f2])
            .await
            .unwrap();
        assert_eq!(frame.payload(), pdu.as_slice());
    }

    #[tokio::test]
    async fn rejects_unknown_function_code() {
        let err = parse(&mut FramedReader::rtu_request(), &[&[0x01, 0x63]])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RequestError::BadFrame(FrameParseError::UnknownFunctionCode(0x63))
        );
    }

    #[test]
    fn formats_the_reference_frame() {
        let mut formatter = RtuFormatter::new();
        let bytes = formatter
            .format(
                FrameHeader::new_serial(UnitId::new(0x01)),
                &[0x03, 0x00, 0x00, 0x00, 0x01],
                FrameDecodeLevel::Nothing,
            )
            .unwrap();
        assert_eq!(bytes, READ_REQUEST);
    }
}
