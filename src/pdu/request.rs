use crate::common::bits;
use crate::constants::{limits, mei};
use crate::error::{InvalidRequest, RequestError};
use crate::pdu::{FunctionCode, Pdu};
use crate::types::{coil_to_u16, AddressRange, FileRecord, Indexed, ReadDeviceIdCode};

/// Request builders for every supported function code.
///
/// Each builder enforces the per-function-code constraints before any I/O
/// happens: a violation surfaces as `RequestError::BadRequest` without a
/// single byte hitting the wire.

fn read_request(function: FunctionCode, range: AddressRange) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new(function.get_value());
    pdu.push_u16(range.start)?;
    pdu.push_u16(range.count)?;
    Ok(pdu)
}

pub(crate) fn read_coils(range: AddressRange) -> Result<Pdu, RequestError> {
    read_request(FunctionCode::ReadCoils, range.of_read_bits()?)
}

pub(crate) fn read_discrete_inputs(range: AddressRange) -> Result<Pdu, RequestError> {
    read_request(FunctionCode::ReadDiscreteInputs, range.of_read_bits()?)
}

pub(crate) fn read_holding_registers(range: AddressRange) -> Result<Pdu, RequestError> {
    read_request(FunctionCode::ReadHoldingRegisters, range.of_read_registers()?)
}

pub(crate) fn read_input_registers(range: AddressRange) -> Result<Pdu, RequestError> {
    read_request(FunctionCode::ReadInputRegisters, range.of_read_registers()?)
}

pub(crate) fn write_single_coil(value: Indexed<bool>) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new(FunctionCode::WriteSingleCoil.get_value());
    pdu.push_u16(value.index)?;
    pdu.push_u16(coil_to_u16(value.value))?;
    Ok(pdu)
}

pub(crate) fn write_single_register(value: Indexed<u16>) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new(FunctionCode::WriteSingleRegister.get_value());
    pdu.push_u16(value.index)?;
    pdu.push_u16(value.value)?;
    Ok(pdu)
}

pub(crate) fn write_multiple_coils(start: u16, values: &[bool]) -> Result<Pdu, RequestError> {
    let count = u16::try_from(values.len())
        .map_err(|_| InvalidRequest::CountTooBigForType(u16::MAX, limits::MAX_WRITE_COILS_COUNT))?;
    let range = AddressRange::try_from(start, count)?.of_write_bits()?;

    let packed = bits::pack_bits(values);
    let mut pdu = Pdu::new(FunctionCode::WriteMultipleCoils.get_value());
    pdu.push_u16(range.start)?;
    pdu.push_u16(range.count)?;
    pdu.push(packed.len() as u8)?;
    pdu.extend(&packed)?;
    Ok(pdu)
}

pub(crate) fn write_multiple_registers(start: u16, values: &[u16]) -> Result<Pdu, RequestError> {
    let count = u16::try_from(values.len()).map_err(|_| {
        InvalidRequest::CountTooBigForType(u16::MAX, limits::MAX_WRITE_REGISTERS_COUNT)
    })?;
    let range = AddressRange::try_from(start, count)?.of_write_registers()?;

    let mut pdu = Pdu::new(FunctionCode::WriteMultipleRegisters.get_value());
    pdu.push_u16(range.start)?;
    pdu.push_u16(range.count)?;
    pdu.push((values.len() * 2) as u8)?;
    for value in values {
        pdu.push_u16(*value)?;
    }
    Ok(pdu)
}

pub(crate) fn mask_write_register(
    address: u16,
    and_mask: u16,
    or_mask: u16,
) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new(FunctionCode::MaskWriteRegister.get_value());
    pdu.push_u16(address)?;
    pdu.push_u16(and_mask)?;
    pdu.push_u16(or_mask)?;
    Ok(pdu)
}

pub(crate) fn read_write_multiple_registers(
    read_range: AddressRange,
    write_start: u16,
    values: &[u16],
) -> Result<Pdu, RequestError> {
    let read_range = read_range.limited(limits::MAX_READ_WRITE_READ_COUNT)?;
    let write_count = u16::try_from(values.len()).map_err(|_| {
        InvalidRequest::CountTooBigForType(u16::MAX, limits::MAX_READ_WRITE_WRITE_COUNT)
    })?;
    let write_range =
        AddressRange::try_from(write_start, write_count)?.limited(limits::MAX_READ_WRITE_WRITE_COUNT)?;

    let mut pdu = Pdu::new(FunctionCode::ReadWriteMultipleRegisters.get_value());
    pdu.push_u16(read_range.start)?;
    pdu.push_u16(read_range.count)?;
    pdu.push_u16(write_range.start)?;
    pdu.push_u16(write_range.count)?;
    pdu.push((values.len() * 2) as u8)?;
    for value in values {
        pdu.push_u16(*value)?;
    }
    Ok(pdu)
}

pub(crate) fn read_fifo_queue(address: u16) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new(FunctionCode::ReadFifoQueue.get_value());
    pdu.push_u16(address)?;
    Ok(pdu)
}

pub(crate) fn read_exception_status() -> Result<Pdu, RequestError> {
    Ok(Pdu::new(FunctionCode::ReadExceptionStatus.get_value()))
}

pub(crate) fn diagnostics(sub_function: u16, data: &[u8]) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new(FunctionCode::Diagnostics.get_value());
    pdu.push_u16(sub_function)?;
    pdu.extend(data)?;
    Ok(pdu)
}

pub(crate) fn get_comm_event_counter() -> Result<Pdu, RequestError> {
    Ok(Pdu::new(FunctionCode::GetCommEventCounter.get_value()))
}

pub(crate) fn get_comm_event_log() -> Result<Pdu, RequestError> {
    Ok(Pdu::new(FunctionCode::GetCommEventLog.get_value()))
}

pub(crate) fn report_server_id() -> Result<Pdu, RequestError> {
    Ok(Pdu::new(FunctionCode::ReportServerId.get_value()))
}

pub(crate) fn read_file_record(records: &[FileRecord]) -> Result<Pdu, RequestError> {
    if records.is_empty() {
        return Err(InvalidRequest::NoRecords.into());
    }

    let byte_count = records.len() * 7;
    if byte_count > limits::MAX_READ_FILE_RECORD_BYTES {
        return Err(
            InvalidRequest::FileRecordsTooBig(byte_count, limits::MAX_READ_FILE_RECORD_BYTES)
                .into(),
        );
    }

    let mut pdu = Pdu::new(FunctionCode::ReadFileRecord.get_value());
    pdu.push(byte_count as u8)?;
    for record in records {
        record.validate()?;
        pdu.push(crate::constants::file::REFERENCE_TYPE)?;
        pdu.push_u16(record.file_number)?;
        pdu.push_u16(record.record_number)?;
        pdu.push_u16(record.record_length)?;
    }
    Ok(pdu)
}

pub(crate) fn write_file_record(records: &[FileRecord]) -> Result<Pdu, RequestError> {
    if records.is_empty() {
        return Err(InvalidRequest::NoRecords.into());
    }

    let byte_count: usize = records.iter().map(|r| 7 + 2 * r.record_data.len()).sum();
    if byte_count > limits::MAX_WRITE_FILE_RECORD_BYTES {
        return Err(
            InvalidRequest::FileRecordsTooBig(byte_count, limits::MAX_WRITE_FILE_RECORD_BYTES)
                .into(),
        );
    }

    let mut pdu = Pdu::new(FunctionCode::WriteFileRecord.get_value());
    pdu.push(byte_count as u8)?;
    for record in records {
        record.validate_write()?;
        pdu.push(crate::constants::file::REFERENCE_TYPE)?;
        pdu.push_u16(record.file_number)?;
        pdu.push_u16(record.record_number)?;
        pdu.push_u16(record.record_length)?;
        for value in &record.record_data {
            pdu.push_u16(*value)?;
        }
    }
    Ok(pdu)
}

pub(crate) fn read_device_identification(
    read_code: ReadDeviceIdCode,
    object_id: u8,
) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new(FunctionCode::EncapsulatedInterface.get_value());
    pdu.push(mei::DEVICE_IDENTIFICATION)?;
    pdu.push(read_code.to_u8())?;
    pdu.push(object_id)?;
    Ok(pdu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    #[test]
    fn builds_read_holding_registers() {
        let pdu = read_holding_registers(range(0, 5)).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x00, 0x00, 0x05]);
    }

    #[test]
    fn rejects_read_quantity_above_limit() {
        assert_eq!(
            read_holding_registers(range(0, 126)),
            Err(RequestError::BadRequest(
                InvalidRequest::CountTooBigForType(126, 125)
            ))
        );
        assert_eq!(
            read_coils(range(0, 2001)),
            Err(RequestError::BadRequest(
                InvalidRequest::CountTooBigForType(2001, 2000)
            ))
        );
    }

    #[test]
    fn builds_write_single_coil() {
        let pdu = write_single_coil(Indexed::new(10, true)).unwrap();
        assert_eq!(pdu.as_slice(), &[0x05, 0x00, 0x0A, 0xFF, 0x00]);
        let pdu = write_single_coil(Indexed::new(10, false)).unwrap();
        assert_eq!(pdu.as_slice(), &[0x05, 0x00, 0x0A, 0x00, 0x00]);
    }

    #[test]
    fn builds_write_multiple_coils_with_packed_bits() {
        let pdu = write_multiple_coils(
            19,
            &[true, false, true, true, false, false, true, true, true, false],
        )
        .unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
    }

    #[test]
    fn rejects_write_coil_count_above_limit() {
        let values = vec![false; 1969];
        assert_eq!(
            write_multiple_coils(0, &values),
            Err(RequestError::BadRequest(
                InvalidRequest::CountTooBigForType(1969, 1968)
            ))
        );
    }

    #[test]
    fn builds_mask_write() {
        let pdu = mask_write_register(40, 0x00F2, 0x0025).unwrap();
        assert_eq!(pdu.as_slice(), &[0x16, 0x00, 0x28, 0x00, 0xF2, 0x00, 0x25]);
    }

    #[test]
    fn read_write_multiple_validates_both_ranges() {
        assert!(read_write_multiple_registers(range(0, 125), 0, &[0; 121]).is_ok());
        assert_eq!(
            read_write_multiple_registers(range(0, 126), 0, &[0; 1]),
            Err(RequestError::BadRequest(
                InvalidRequest::CountTooBigForType(126, 125)
            ))
        );
        assert_eq!(
            read_write_multiple_registers(range(0, 1), 0, &[0; 122]),
            Err(RequestError::BadRequest(
                InvalidRequest::CountTooBigForType(122, 121)
            ))
        );
    }

    #[test]
    fn address_overflow_is_rejected_before_io() {
        assert_eq!(
            write_multiple_registers(0xFFFF, &[1, 2]),
            Err(RequestError::BadRequest(InvalidRequest::AddressOverflow(
                0xFFFF, 2
            )))
        );
    }

    #[test]
    fn file_record_read_request_layout() {
        let pdu = read_file_record(&[FileRecord::read(4, 1, 2)]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x14, 0x07, 0x06, 0x00, 0x04, 0x00, 0x01, 0x00, 0x02]
        );
    }

    #[test]
    fn file_record_request_size_limit() {
        // 36 sub-requests occupy 252 bytes, over the 245 byte limit
        let records: Vec<FileRecord> = (0..36).map(|i| FileRecord::read(1, i, 1)).collect();
        assert_eq!(
            read_file_record(&records),
            Err(RequestError::BadRequest(InvalidRequest::FileRecordsTooBig(
                252, 245
            )))
        );
    }

    #[test]
    fn device_identification_request_layout() {
        let pdu = read_device_identification(ReadDeviceIdCode::Basic, 0).unwrap();
        assert_eq!(pdu.as_slice(), &[0x2B, 0x0E, 0x01, 0x00]);
    }
}
