use scursor::ReadCursor;

use crate::common::bits;
use crate::constants::{limits, mei};
use crate::error::{AduParseError, RequestError};
use crate::exception::ExceptionCode;
use crate::pdu::{FunctionCode, Pdu};
use crate::types::{
    AddressRange, CommEventCounter, CommEventLog, DeviceIdentification, FileRecord, ServerId,
};

/// Response parsers for every supported function code.
///
/// Each parser first classifies the response function code: the exception
/// form surfaces the reported exception code as a typed error, any other
/// mismatch is a parse error. Echo fields are compared byte-for-byte against
/// the request so that a confused server cannot be mistaken for a success.

fn expect_empty(cursor: &ReadCursor) -> Result<(), RequestError> {
    if !cursor.is_empty() {
        return Err(AduParseError::TrailingBytes(cursor.remaining()).into());
    }
    Ok(())
}

fn check_function(pdu: &Pdu, function: FunctionCode) -> Result<(), RequestError> {
    let received = pdu.function();
    if received == function.get_value() {
        return Ok(());
    }

    if received == function.as_error() {
        let code = pdu
            .payload()
            .first()
            .copied()
            .map(ExceptionCode::from)
            .ok_or(AduParseError::InsufficientBytes)?;
        return Err(RequestError::Exception(function, code));
    }

    Err(AduParseError::UnknownResponseFunction(
        received,
        function.get_value(),
        function.as_error(),
    )
    .into())
}

fn parse_read_bits(
    pdu: &Pdu,
    function: FunctionCode,
    range: AddressRange,
) -> Result<Vec<bool>, RequestError> {
    check_function(pdu, function)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let byte_count = cursor.read_u8()? as usize;
    let expected = bits::num_bytes_for_bits(range.count);

    if byte_count != expected {
        return Err(AduParseError::ByteCountMismatch(expected, byte_count).into());
    }
    if cursor.remaining() != byte_count {
        return Err(
            AduParseError::InsufficientBytesForByteCount(byte_count, cursor.remaining()).into(),
        );
    }

    let bytes = cursor.read_bytes(byte_count)?;
    expect_empty(&cursor)?;
    Ok(bits::unpack_bits(bytes, range.count))
}

pub(crate) fn read_coils(pdu: &Pdu, range: AddressRange) -> Result<Vec<bool>, RequestError> {
    parse_read_bits(pdu, FunctionCode::ReadCoils, range)
}

pub(crate) fn read_discrete_inputs(
    pdu: &Pdu,
    range: AddressRange,
) -> Result<Vec<bool>, RequestError> {
    parse_read_bits(pdu, FunctionCode::ReadDiscreteInputs, range)
}

fn parse_registers(cursor: &mut ReadCursor, count: usize) -> Result<Vec<u16>, RequestError> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(cursor.read_u16_be()?);
    }
    Ok(values)
}

fn parse_read_registers(
    pdu: &Pdu,
    function: FunctionCode,
    count: u16,
) -> Result<Vec<u16>, RequestError> {
    check_function(pdu, function)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let byte_count = cursor.read_u8()? as usize;
    let expected = 2 * count as usize;

    if byte_count != expected {
        return Err(AduParseError::ByteCountMismatch(expected, byte_count).into());
    }
    if cursor.remaining() != byte_count {
        return Err(
            AduParseError::InsufficientBytesForByteCount(byte_count, cursor.remaining()).into(),
        );
    }

    let values = parse_registers(&mut cursor, count as usize)?;
    expect_empty(&cursor)?;
    Ok(values)
}

pub(crate) fn read_holding_registers(pdu: &Pdu, count: u16) -> Result<Vec<u16>, RequestError> {
    parse_read_registers(pdu, FunctionCode::ReadHoldingRegisters, count)
}

pub(crate) fn read_input_registers(pdu: &Pdu, count: u16) -> Result<Vec<u16>, RequestError> {
    parse_read_registers(pdu, FunctionCode::ReadInputRegisters, count)
}

pub(crate) fn read_write_multiple_registers(
    pdu: &Pdu,
    count: u16,
) -> Result<Vec<u16>, RequestError> {
    parse_read_registers(pdu, FunctionCode::ReadWriteMultipleRegisters, count)
}

/// Write responses echo request fields; compare them byte-for-byte
fn check_echo(pdu: &Pdu, function: FunctionCode, expected: &[u8]) -> Result<(), RequestError> {
    check_function(pdu, function)?;
    if pdu.payload() != expected {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }
    Ok(())
}

pub(crate) fn write_single_coil(pdu: &Pdu, request: &Pdu) -> Result<(), RequestError> {
    check_echo(pdu, FunctionCode::WriteSingleCoil, request.payload())
}

pub(crate) fn write_single_register(pdu: &Pdu, request: &Pdu) -> Result<(), RequestError> {
    check_echo(pdu, FunctionCode::WriteSingleRegister, request.payload())
}

pub(crate) fn mask_write_register(pdu: &Pdu, request: &Pdu) -> Result<(), RequestError> {
    check_echo(pdu, FunctionCode::MaskWriteRegister, request.payload())
}

/// Write-multiple responses echo only the starting address and quantity
fn check_range_echo(pdu: &Pdu, function: FunctionCode, request: &Pdu) -> Result<(), RequestError> {
    let expected = request
        .payload()
        .get(..4)
        .ok_or(AduParseError::InsufficientBytes)?;
    check_echo(pdu, function, expected)
}

pub(crate) fn write_multiple_coils(pdu: &Pdu, request: &Pdu) -> Result<(), RequestError> {
    check_range_echo(pdu, FunctionCode::WriteMultipleCoils, request)
}

pub(crate) fn write_multiple_registers(pdu: &Pdu, request: &Pdu) -> Result<(), RequestError> {
    check_range_echo(pdu, FunctionCode::WriteMultipleRegisters, request)
}

pub(crate) fn read_fifo_queue(pdu: &Pdu) -> Result<Vec<u16>, RequestError> {
    check_function(pdu, FunctionCode::ReadFifoQueue)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let byte_count = cursor.read_u16_be()? as usize;
    if cursor.remaining() != byte_count {
        return Err(
            AduParseError::InsufficientBytesForByteCount(byte_count, cursor.remaining()).into(),
        );
    }

    let fifo_count = cursor.read_u16_be()?;
    if fifo_count > limits::MAX_FIFO_COUNT {
        return Err(AduParseError::FifoCountTooLarge(fifo_count).into());
    }
    if byte_count != 2 + 2 * fifo_count as usize {
        return Err(AduParseError::ByteCountMismatch(2 + 2 * fifo_count as usize, byte_count).into());
    }

    let values = parse_registers(&mut cursor, fifo_count as usize)?;
    expect_empty(&cursor)?;
    Ok(values)
}

pub(crate) fn read_exception_status(pdu: &Pdu) -> Result<u8, RequestError> {
    check_function(pdu, FunctionCode::ReadExceptionStatus)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let status = cursor.read_u8()?;
    expect_empty(&cursor)?;
    Ok(status)
}

pub(crate) fn diagnostics(pdu: &Pdu, sub_function: u16) -> Result<Vec<u8>, RequestError> {
    check_function(pdu, FunctionCode::Diagnostics)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let echoed = cursor.read_u16_be()?;
    if echoed != sub_function {
        return Err(AduParseError::SubFunctionMismatch(echoed, sub_function).into());
    }

    let data = cursor.read_bytes(cursor.remaining())?;
    Ok(data.to_vec())
}

pub(crate) fn get_comm_event_counter(pdu: &Pdu) -> Result<CommEventCounter, RequestError> {
    check_function(pdu, FunctionCode::GetCommEventCounter)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let status = cursor.read_u16_be()?;
    let event_count = cursor.read_u16_be()?;
    expect_empty(&cursor)?;
    Ok(CommEventCounter {
        status,
        event_count,
    })
}

pub(crate) fn get_comm_event_log(pdu: &Pdu) -> Result<CommEventLog, RequestError> {
    check_function(pdu, FunctionCode::GetCommEventLog)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let byte_count = cursor.read_u8()? as usize;
    if cursor.remaining() != byte_count {
        return Err(
            AduParseError::InsufficientBytesForByteCount(byte_count, cursor.remaining()).into(),
        );
    }
    if byte_count < 6 {
        return Err(AduParseError::InsufficientBytes.into());
    }

    let status = cursor.read_u16_be()?;
    let event_count = cursor.read_u16_be()?;
    let message_count = cursor.read_u16_be()?;
    let events = cursor.read_bytes(cursor.remaining())?.to_vec();
    Ok(CommEventLog {
        status,
        event_count,
        message_count,
        events,
    })
}

pub(crate) fn report_server_id(pdu: &Pdu) -> Result<ServerId, RequestError> {
    check_function(pdu, FunctionCode::ReportServerId)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let byte_count = cursor.read_u8()? as usize;
    if cursor.remaining() != byte_count {
        return Err(
            AduParseError::InsufficientBytesForByteCount(byte_count, cursor.remaining()).into(),
        );
    }
    if byte_count < 1 {
        return Err(AduParseError::InsufficientBytes.into());
    }

    let run_indicator = cursor.read_u8()? == 0xFF;
    let server_id = cursor.read_bytes(cursor.remaining())?.to_vec();
    Ok(ServerId {
        server_id,
        run_indicator,
    })
}

pub(crate) fn read_file_record(
    pdu: &Pdu,
    requests: &[FileRecord],
) -> Result<Vec<FileRecord>, RequestError> {
    check_function(pdu, FunctionCode::ReadFileRecord)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let byte_count = cursor.read_u8()? as usize;
    if cursor.remaining() != byte_count {
        return Err(
            AduParseError::InsufficientBytesForByteCount(byte_count, cursor.remaining()).into(),
        );
    }

    let mut records = Vec::with_capacity(requests.len());
    for request in requests {
        let sub_length = cursor.read_u8()?;
        // sub-response length is the reference type byte plus the data
        if sub_length < 1 || sub_length % 2 == 0 {
            return Err(AduParseError::BadSubRecordLength(sub_length).into());
        }

        let reference_type = cursor.read_u8()?;
        if reference_type != crate::constants::file::REFERENCE_TYPE {
            return Err(AduParseError::ReplyEchoMismatch.into());
        }

        let register_count = (sub_length as usize - 1) / 2;
        if register_count != request.record_length as usize {
            return Err(
                AduParseError::ByteCountMismatch(request.record_length as usize, register_count)
                    .into(),
            );
        }

        let record_data = parse_registers(&mut cursor, register_count)?;
        records.push(FileRecord {
            file_number: request.file_number,
            record_number: request.record_number,
            record_length: register_count as u16,
            record_data,
        });
    }

    expect_empty(&cursor)?;
    Ok(records)
}

pub(crate) fn write_file_record(pdu: &Pdu, request: &Pdu) -> Result<(), RequestError> {
    check_echo(pdu, FunctionCode::WriteFileRecord, request.payload())
}

pub(crate) fn read_device_identification(
    pdu: &Pdu,
) -> Result<(DeviceIdentification, bool, u8), RequestError> {
    check_function(pdu, FunctionCode::EncapsulatedInterface)?;

    let mut cursor = ReadCursor::new(pdu.payload());
    let mei_type = cursor.read_u8()?;
    if mei_type != mei::DEVICE_IDENTIFICATION {
        return Err(AduParseError::MeiTypeMismatch(mei_type).into());
    }

    let _read_code = cursor.read_u8()?;
    let conformity_level = cursor.read_u8()?;
    let more_follows = cursor.read_u8()? != 0;
    let next_object_id = cursor.read_u8()?;
    let object_count = cursor.read_u8()?;

    let mut identification = DeviceIdentification {
        vendor_name: String::new(),
        product_code: String::new(),
        major_minor_revision: String::new(),
        vendor_url: String::new(),
        product_name: String::new(),
        model_name: String::new(),
        user_application_name: String::new(),
        extended_objects: Vec::new(),
        conformity_level,
    };

    // self-terminating walk: stop at the declared count or when data runs out
    let mut seen = 0;
    while seen < object_count && cursor.remaining() >= 2 {
        let object_id = cursor.read_u8()?;
        let length = cursor.read_u8()? as usize;
        if cursor.remaining() < length {
            break;
        }
        let raw = cursor.read_bytes(length)?.to_vec();

        use crate::constants::device_id;
        if object_id <= device_id::USER_APPLICATION_NAME {
            let value = String::from_utf8_lossy(&raw).into_owned();
            match object_id {
                device_id::VENDOR_NAME => identification.vendor_name = value,
                device_id::PRODUCT_CODE => identification.product_code = value,
                device_id::MAJOR_MINOR_REVISION => identification.major_minor_revision = value,
                device_id::VENDOR_URL => identification.vendor_url = value,
                device_id::PRODUCT_NAME => identification.product_name = value,
                device_id::MODEL_NAME => identification.model_name = value,
                _ => identification.user_application_name = value,
            }
        } else {
            identification.extended_objects.push((object_id, raw));
        }
        seen += 1;
    }

    Ok((identification, more_follows, next_object_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::request;
    use crate::types::Indexed;

    fn pdu(bytes: &[u8]) -> Pdu {
        Pdu::from_slice(bytes).unwrap()
    }

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    #[test]
    fn parses_read_holding_registers_response() {
        let values = read_holding_registers(
            &pdu(&[
                0x03, 0x0A, 0x00, 0x00, 0x00, 0x64, 0x00, 0xC8, 0x01, 0x2C, 0x01, 0x90,
            ]),
            5,
        )
        .unwrap();
        assert_eq!(values, vec![0, 100, 200, 300, 400]);
    }

    #[test]
    fn surfaces_exception_responses() {
        let err = read_holding_registers(&pdu(&[0x83, 0x02]), 5).unwrap_err();
        assert_eq!(
            err,
            RequestError::Exception(
                FunctionCode::ReadHoldingRegisters,
                ExceptionCode::IllegalDataAddress
            )
        );
    }

    #[test]
    fn rejects_byte_count_mismatch() {
        let err = read_holding_registers(&pdu(&[0x03, 0x04, 0x00, 0x01, 0x00, 0x02]), 5).unwrap_err();
        assert_eq!(
            err,
            RequestError::BadResponse(AduParseError::ByteCountMismatch(10, 4))
        );
    }

    #[test]
    fn rejects_byte_count_that_disagrees_with_payload() {
        let err = read_holding_registers(&pdu(&[0x03, 0x0A, 0x00, 0x01]), 5).unwrap_err();
        assert_eq!(
            err,
            RequestError::BadResponse(AduParseError::InsufficientBytesForByteCount(10, 2))
        );
    }

    #[test]
    fn parses_read_coils_response() {
        let values = read_coils(&pdu(&[0x01, 0x02, 0xCD, 0x01]), range(19, 10)).unwrap();
        assert_eq!(
            values,
            vec![true, false, true, true, false, false, true, true, true, false]
        );
    }

    #[test]
    fn write_single_coil_echo_is_validated() {
        let request = request::write_single_coil(Indexed::new(10, true)).unwrap();
        assert!(write_single_coil(&pdu(&[0x05, 0x00, 0x0A, 0xFF, 0x00]), &request).is_ok());
        assert_eq!(
            write_single_coil(&pdu(&[0x05, 0x00, 0x0B, 0xFF, 0x00]), &request).unwrap_err(),
            RequestError::BadResponse(AduParseError::ReplyEchoMismatch)
        );
    }

    #[test]
    fn write_multiple_registers_echoes_address_and_quantity() {
        let request = request::write_multiple_registers(100, &[1, 2, 3]).unwrap();
        assert!(write_multiple_registers(&pdu(&[0x10, 0x00, 0x64, 0x00, 0x03]), &request).is_ok());
        assert_eq!(
            write_multiple_registers(&pdu(&[0x10, 0x00, 0x64, 0x00, 0x02]), &request).unwrap_err(),
            RequestError::BadResponse(AduParseError::ReplyEchoMismatch)
        );
    }

    #[test]
    fn mask_write_echoes_six_bytes() {
        let request = request::mask_write_register(40, 0x00F2, 0x0025).unwrap();
        assert!(
            mask_write_register(&pdu(&[0x16, 0x00, 0x28, 0x00, 0xF2, 0x00, 0x25]), &request)
                .is_ok()
        );
        assert_eq!(
            mask_write_register(&pdu(&[0x16, 0x00, 0x28, 0x00, 0xF2, 0x00, 0x26]), &request)
                .unwrap_err(),
            RequestError::BadResponse(AduParseError::ReplyEchoMismatch)
        );
    }

    #[test]
    fn parses_fifo_response() {
        let values = read_fifo_queue(&pdu(&[
            0x18, 0x00, 0x06, 0x00, 0x02, 0x01, 0xB8, 0x12, 0x84,
        ]))
        .unwrap();
        assert_eq!(values, vec![0x01B8, 0x1284]);
    }

    #[test]
    fn rejects_fifo_count_over_31() {
        // byte count claims 66 = 2 + 2*32
        let mut bytes = vec![0x18, 0x00, 0x42, 0x00, 0x20];
        bytes.extend_from_slice(&[0; 64]);
        assert_eq!(
            read_fifo_queue(&pdu(&bytes)).unwrap_err(),
            RequestError::BadResponse(AduParseError::FifoCountTooLarge(32))
        );
    }

    #[test]
    fn parses_empty_fifo() {
        let values = read_fifo_queue(&pdu(&[0x18, 0x00, 0x02, 0x00, 0x00])).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn parses_device_identification() {
        let mut bytes = vec![0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x03];
        bytes.extend_from_slice(&[0x00, 0x04]);
        bytes.extend_from_slice(b"Acme");
        bytes.extend_from_slice(&[0x01, 0x05]);
        bytes.extend_from_slice(b"AC-42");
        bytes.extend_from_slice(&[0x02, 0x03]);
        bytes.extend_from_slice(b"2.1");

        let (id, more_follows, next) = read_device_identification(&pdu(&bytes)).unwrap();
        assert!(!more_follows);
        assert_eq!(next, 0);
        assert_eq!(id.vendor_name, "Acme");
        assert_eq!(id.product_code, "AC-42");
        assert_eq!(id.major_minor_revision, "2.1");
        assert_eq!(id.conformity_level, 0x01);
    }

    #[test]
    fn parses_file_record_response() {
        let requests = vec![FileRecord::read(4, 1, 2)];
        let records = read_file_record(
            &pdu(&[0x14, 0x06, 0x05, 0x06, 0x0D, 0xFE, 0x00, 0x20]),
            &requests,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_data, vec![0x0DFE, 0x0020]);
        assert_eq!(records[0].file_number, 4);
    }

    #[test]
    fn parses_comm_event_log() {
        let log = get_comm_event_log(&pdu(&[
            0x0C, 0x08, 0x00, 0x00, 0x01, 0x08, 0x01, 0x21, 0x20, 0x00,
        ]))
        .unwrap();
        assert_eq!(log.status, 0);
        assert_eq!(log.event_count, 0x0108);
        assert_eq!(log.message_count, 0x0121);
        assert_eq!(log.events, vec![0x20, 0x00]);
    }

    #[test]
    fn parses_server_id() {
        let id = report_server_id(&pdu(&[0x11, 0x03, 0xFF, 0x12, 0x34])).unwrap();
        assert!(id.run_indicator);
        assert_eq!(id.server_id, vec![0x12, 0x34]);
    }
}
