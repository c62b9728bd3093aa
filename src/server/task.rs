use std::sync::Arc;

use scursor::ReadCursor;

use crate::common::bits;
use crate::common::frame::{Frame, FramedReader, FrameWriter};
use crate::common::phys::PhysLayer;
use crate::constants::{limits, mei};
use crate::decode::DecodeLevel;
use crate::error::{InternalError, RequestError};
use crate::exception::ExceptionCode;
use crate::pdu::{FunctionCode, Pdu};
use crate::server::handler::DataStore;
use crate::types::{
    coil_from_u16, AddressRange, DeviceIdentification, FileRecord, ReadDeviceIdCode,
};

/// Serves one connection: reads framed requests, dispatches them into the
/// data store, and writes framed responses until shutdown or a read error.
pub(crate) struct SessionTask<S: DataStore> {
    phys: PhysLayer,
    store: Arc<S>,
    device: Arc<DeviceIdentification>,
    reader: FramedReader,
    writer: FrameWriter,
    shutdown: tokio::sync::mpsc::Receiver<()>,
    decode: DecodeLevel,
}

impl<S: DataStore> SessionTask<S> {
    pub(crate) fn new(
        phys: PhysLayer,
        store: Arc<S>,
        device: Arc<DeviceIdentification>,
        reader: FramedReader,
        writer: FrameWriter,
        shutdown: tokio::sync::mpsc::Receiver<()>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            phys,
            store,
            device,
            reader,
            writer,
            shutdown,
            decode,
        }
    }

    pub(crate) async fn run(&mut self) -> Result<(), RequestError> {
        loop {
            self.run_one().await?;
        }
    }

    async fn run_one(&mut self) -> Result<(), RequestError> {
        tokio::select! {
            frame = self.reader.next_frame(&mut self.phys, self.decode.frame) => {
                self.reply_to_request(frame?).await
            }
            _ = self.shutdown.recv() => {
                Err(RequestError::Shutdown)
            }
        }
    }

    async fn reply_to_request(&mut self, frame: Frame) -> Result<(), RequestError> {
        let payload = frame.payload();
        let raw_function = match payload.first() {
            Some(value) => *value,
            None => {
                tracing::warn!("received an empty frame");
                return Ok(());
            }
        };

        // a broadcast performs the operation but never gets an answer, not
        // even an exception response
        let broadcast = frame.header.unit_id.is_broadcast();

        let response = match FunctionCode::get(raw_function) {
            None => {
                tracing::warn!("received unknown function code: {}", raw_function);
                Err(ExceptionCode::IllegalFunction)
            }
            Some(function) => {
                if self.decode.app.enabled() {
                    tracing::info!("PDU RX - {}", function);
                }
                dispatch(
                    self.store.as_ref(),
                    self.device.as_ref(),
                    function,
                    &payload[1..],
                )
            }
        };

        if broadcast {
            return Ok(());
        }

        let response = match response {
            Ok(pdu) => pdu,
            Err(code) => Pdu::exception(raw_function, code),
        };

        let bytes = self
            .writer
            .format(frame.header, &response, self.decode.frame)?;
        self.phys.write(bytes).await?;
        Ok(())
    }
}

/// Decode the request payload, invoke the store, and assemble the response
/// PDU. Handlers validate the payload length exactly: anything malformed is
/// `IllegalDataValue`, an unreasonable quantity is `IllegalDataValue`, and
/// out-of-range addressing surfaces from the store as `IllegalDataAddress`.
pub(crate) fn dispatch<S: DataStore>(
    store: &S,
    device: &DeviceIdentification,
    function: FunctionCode,
    payload: &[u8],
) -> Result<Pdu, ExceptionCode> {
    let mut cursor = ReadCursor::new(payload);
    match function {
        FunctionCode::ReadCoils => {
            let range = read_range(&mut cursor, limits::MAX_READ_COILS_COUNT)?;
            let values = store.read_coils(range)?;
            bit_response(function, &values)
        }
        FunctionCode::ReadDiscreteInputs => {
            let range = read_range(&mut cursor, limits::MAX_READ_DISCRETE_INPUTS_COUNT)?;
            let values = store.read_discrete_inputs(range)?;
            bit_response(function, &values)
        }
        FunctionCode::ReadHoldingRegisters => {
            let range = read_range(&mut cursor, limits::MAX_READ_REGISTERS_COUNT)?;
            let values = store.read_holding_registers(range)?;
            register_response(function, &values)
        }
        FunctionCode::ReadInputRegisters => {
            let range = read_range(&mut cursor, limits::MAX_READ_REGISTERS_COUNT)?;
            let values = store.read_input_registers(range)?;
            register_response(function, &values)
        }
        FunctionCode::WriteSingleCoil => {
            let address = decode(cursor.read_u16_be())?;
            let value = coil_from_u16(decode(cursor.read_u16_be())?)
                .map_err(|_| ExceptionCode::IllegalDataValue)?;
            expect_empty(&cursor)?;

            store.write_coils(address, &[value])?;
            echo_response(function, payload)
        }
        FunctionCode::WriteSingleRegister => {
            let address = decode(cursor.read_u16_be())?;
            let value = decode(cursor.read_u16_be())?;
            expect_empty(&cursor)?;

            store.write_holding_registers(address, &[value])?;
            echo_response(function, payload)
        }
        FunctionCode::WriteMultipleCoils => {
            let range = read_range(&mut cursor, limits::MAX_WRITE_COILS_COUNT)?;
            let byte_count = decode(cursor.read_u8())? as usize;
            if byte_count != bits::num_bytes_for_bits(range.count)
                || cursor.remaining() != byte_count
            {
                return Err(ExceptionCode::IllegalDataValue);
            }

            let values = bits::unpack_bits(decode(cursor.read_bytes(byte_count))?, range.count);
            store.write_coils(range.start, &values)?;
            range_echo_response(function, range)
        }
        FunctionCode::WriteMultipleRegisters => {
            let range = read_range(&mut cursor, limits::MAX_WRITE_REGISTERS_COUNT)?;
            let byte_count = decode(cursor.read_u8())? as usize;
            if byte_count != 2 * range.count as usize || cursor.remaining() != byte_count {
                return Err(ExceptionCode::IllegalDataValue);
            }

            let values = read_registers(&mut cursor, range.count as usize)?;
            store.write_holding_registers(range.start, &values)?;
            range_echo_response(function, range)
        }
        FunctionCode::MaskWriteRegister => {
            let address = decode(cursor.read_u16_be())?;
            let and_mask = decode(cursor.read_u16_be())?;
            let or_mask = decode(cursor.read_u16_be())?;
            expect_empty(&cursor)?;

            store.mask_write_register(address, and_mask, or_mask)?;
            echo_response(function, payload)
        }
        FunctionCode::ReadWriteMultipleRegisters => {
            let read_addr_range = read_range(&mut cursor, limits::MAX_READ_WRITE_READ_COUNT)?;
            let write_range = read_range(&mut cursor, limits::MAX_READ_WRITE_WRITE_COUNT)?;
            let byte_count = decode(cursor.read_u8())? as usize;
            if byte_count != 2 * write_range.count as usize || cursor.remaining() != byte_count {
                return Err(ExceptionCode::IllegalDataValue);
            }

            let values = read_registers(&mut cursor, write_range.count as usize)?;
            let read_back = store.read_write_registers(read_addr_range, write_range.start, &values)?;
            register_response(function, &read_back)
        }
        FunctionCode::ReadFifoQueue => {
            let address = decode(cursor.read_u16_be())?;
            expect_empty(&cursor)?;

            let values = store.read_fifo_queue(address)?;
            if values.len() > limits::MAX_FIFO_COUNT as usize {
                return Err(ExceptionCode::IllegalDataValue);
            }

            let mut pdu = Pdu::new(function.get_value());
            build(pdu.push_u16((2 + 2 * values.len()) as u16))?;
            build(pdu.push_u16(values.len() as u16))?;
            for value in &values {
                build(pdu.push_u16(*value))?;
            }
            Ok(pdu)
        }
        FunctionCode::ReadExceptionStatus => {
            expect_empty(&cursor)?;
            let status = store.read_exception_status()?;

            let mut pdu = Pdu::new(function.get_value());
            build(pdu.push(status))?;
            Ok(pdu)
        }
        FunctionCode::Diagnostics => {
            let sub_function = decode(cursor.read_u16_be())?;
            let data = decode(cursor.read_bytes(cursor.remaining()))?;

            let result = store.diagnostics(sub_function, data)?;
            let mut pdu = Pdu::new(function.get_value());
            build(pdu.push_u16(sub_function))?;
            build(pdu.extend(&result))?;
            Ok(pdu)
        }
        FunctionCode::GetCommEventCounter => {
            expect_empty(&cursor)?;
            let counter = store.comm_event_counter()?;

            let mut pdu = Pdu::new(function.get_value());
            build(pdu.push_u16(counter.status))?;
            build(pdu.push_u16(counter.event_count))?;
            Ok(pdu)
        }
        FunctionCode::GetCommEventLog => {
            expect_empty(&cursor)?;
            let log = store.comm_event_log()?;

            let mut pdu = Pdu::new(function.get_value());
            build(pdu.push((6 + log.events.len()) as u8))?;
            build(pdu.push_u16(log.status))?;
            build(pdu.push_u16(log.event_count))?;
            build(pdu.push_u16(log.message_count))?;
            build(pdu.extend(&log.events))?;
            Ok(pdu)
        }
        FunctionCode::ReportServerId => {
            expect_empty(&cursor)?;
            let id = store.server_id()?;

            let mut pdu = Pdu::new(function.get_value());
            build(pdu.push((1 + id.server_id.len()) as u8))?;
            build(pdu.push(if id.run_indicator { 0xFF } else { 0x00 }))?;
            build(pdu.extend(&id.server_id))?;
            Ok(pdu)
        }
        FunctionCode::ReadFileRecord => {
            let requests = parse_file_sub_requests(
                &mut cursor,
                limits::MAX_READ_FILE_RECORD_BYTES,
                false,
            )?;
            let records = store.read_file_records(&requests)?;

            let mut pdu = Pdu::new(function.get_value());
            let total: usize = records.iter().map(|r| 2 + 2 * r.record_data.len()).sum();
            build(pdu.push(u8::try_from(total).map_err(|_| ExceptionCode::IllegalDataValue)?))?;
            for record in &records {
                build(pdu.push((1 + 2 * record.record_data.len()) as u8))?;
                build(pdu.push(crate::constants::file::REFERENCE_TYPE))?;
                for value in &record.record_data {
                    build(pdu.push_u16(*value))?;
                }
            }
            Ok(pdu)
        }
        FunctionCode::WriteFileRecord => {
            let records = parse_file_sub_requests(
                &mut cursor,
                limits::MAX_WRITE_FILE_RECORD_BYTES,
                true,
            )?;
            store.write_file_records(&records)?;
            echo_response(function, payload)
        }
        FunctionCode::EncapsulatedInterface => {
            let mei_type = decode(cursor.read_u8())?;
            if mei_type != mei::DEVICE_IDENTIFICATION {
                return Err(ExceptionCode::IllegalFunction);
            }

            let read_code = ReadDeviceIdCode::from_u8(decode(cursor.read_u8())?)
                .ok_or(ExceptionCode::IllegalDataValue)?;
            let object_id = decode(cursor.read_u8())?;
            expect_empty(&cursor)?;

            device_identification_response(device, read_code, object_id)
        }
    }
}

fn decode<T, E>(result: Result<T, E>) -> Result<T, ExceptionCode> {
    result.map_err(|_| ExceptionCode::IllegalDataValue)
}

fn build<T>(result: Result<T, InternalError>) -> Result<T, ExceptionCode> {
    result.map_err(|_| ExceptionCode::ServerDeviceFailure)
}

fn expect_empty(cursor: &ReadCursor) -> Result<(), ExceptionCode> {
    if !cursor.is_empty() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn read_range(cursor: &mut ReadCursor, max: u16) -> Result<AddressRange, ExceptionCode> {
    let start = decode(cursor.read_u16_be())?;
    let count = decode(cursor.read_u16_be())?;
    if count == 0 || count > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    AddressRange::try_from(start, count).map_err(|_| ExceptionCode::IllegalDataAddress)
}

fn read_registers(cursor: &mut ReadCursor, count: usize) -> Result<Vec<u16>, ExceptionCode> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decode(cursor.read_u16_be())?);
    }
    Ok(values)
}

fn parse_file_sub_requests(
    cursor: &mut ReadCursor,
    max_bytes: usize,
    with_data: bool,
) -> Result<Vec<FileRecord>, ExceptionCode> {
    let byte_count = decode(cursor.read_u8())? as usize;
    if byte_count > max_bytes || cursor.remaining() != byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let mut records = Vec::new();
    while !cursor.is_empty() {
        let reference_type = decode(cursor.read_u8())?;
        if reference_type != crate::constants::file::REFERENCE_TYPE {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let file_number = decode(cursor.read_u16_be())?;
        let record_number = decode(cursor.read_u16_be())?;
        if record_number > crate::constants::file::MAX_RECORD_NUMBER {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        let record_length = decode(cursor.read_u16_be())?;

        let record_data = if with_data {
            read_registers(cursor, record_length as usize)?
        } else {
            Vec::new()
        };

        records.push(FileRecord {
            file_number,
            record_number,
            record_length,
            record_data,
        });
    }

    if records.is_empty() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(records)
}

fn bit_response(function: FunctionCode, values: &[bool]) -> Result<Pdu, ExceptionCode> {
    let packed = bits::pack_bits(values);
    let mut pdu = Pdu::new(function.get_value());
    build(pdu.push(packed.len() as u8))?;
    build(pdu.extend(&packed))?;
    Ok(pdu)
}

fn register_response(function: FunctionCode, values: &[u16]) -> Result<Pdu, ExceptionCode> {
    let mut pdu = Pdu::new(function.get_value());
    build(pdu.push((2 * values.len()) as u8))?;
    for value in values {
        build(pdu.push_u16(*value))?;
    }
    Ok(pdu)
}

fn echo_response(function: FunctionCode, payload: &[u8]) -> Result<Pdu, ExceptionCode> {
    let mut pdu = Pdu::new(function.get_value());
    build(pdu.extend(payload))?;
    Ok(pdu)
}

fn range_echo_response(function: FunctionCode, range: AddressRange) -> Result<Pdu, ExceptionCode> {
    let mut pdu = Pdu::new(function.get_value());
    build(pdu.push_u16(range.start))?;
    build(pdu.push_u16(range.count))?;
    Ok(pdu)
}

fn device_identification_response(
    device: &DeviceIdentification,
    read_code: ReadDeviceIdCode,
    object_id: u8,
) -> Result<Pdu, ExceptionCode> {
    let all = device.objects();
    let objects: Vec<(u8, &str)> = match read_code {
        // streaming access resumes from the requested object id
        ReadDeviceIdCode::Basic => all
            .into_iter()
            .filter(|(id, _)| *id <= 0x02 && *id >= object_id)
            .collect(),
        ReadDeviceIdCode::Regular | ReadDeviceIdCode::Extended => all
            .into_iter()
            .filter(|(id, _)| *id >= object_id)
            .collect(),
        ReadDeviceIdCode::Specific => {
            let object = all.into_iter().find(|(id, _)| *id == object_id);
            vec![object.ok_or(ExceptionCode::IllegalDataAddress)?]
        }
    };

    if objects.is_empty() {
        return Err(ExceptionCode::IllegalDataAddress);
    }

    let mut pdu = Pdu::new(FunctionCode::EncapsulatedInterface.get_value());
    build(pdu.push(mei::DEVICE_IDENTIFICATION))?;
    build(pdu.push(read_code.to_u8()))?;
    build(pdu.push(device.conformity_level))?;
    build(pdu.push(0x00))?; // more follows
    build(pdu.push(0x00))?; // next object id
    build(pdu.push(objects.len() as u8))?;
    for (id, value) in objects {
        build(pdu.push(id))?;
        build(pdu.push(value.len() as u8))?;
        build(pdu.extend(value.as_bytes()))?;
    }
    Ok(pdu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::memory::MemoryStore;

    fn store() -> MemoryStore {
        let store = MemoryStore::new(100, 100, 100, 100);
        for i in 0..5u16 {
            store.set_holding_register(i, 100 * i).unwrap();
        }
        store
    }

    fn device() -> DeviceIdentification {
        DeviceIdentification::basic("Acme", "AC-42", "2.1")
    }

    fn run(
        store: &MemoryStore,
        function: FunctionCode,
        payload: &[u8],
    ) -> Result<Pdu, ExceptionCode> {
        dispatch(store, &device(), function, payload)
    }

    #[test]
    fn serves_read_holding_registers() {
        let pdu = run(
            &store(),
            FunctionCode::ReadHoldingRegisters,
            &[0x00, 0x00, 0x00, 0x05],
        )
        .unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x03, 0x0A, 0x00, 0x00, 0x00, 0x64, 0x00, 0xC8, 0x01, 0x2C, 0x01, 0x90]
        );
    }

    #[test]
    fn rejects_short_read_payload() {
        assert_eq!(
            run(&store(), FunctionCode::ReadHoldingRegisters, &[0x00, 0x00]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert_eq!(
            run(
                &store(),
                FunctionCode::ReadHoldingRegisters,
                &[0x00, 0x00, 0x00, 0x05, 0xFF],
            )
            .unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn rejects_quantity_above_type_limit() {
        assert_eq!(
            run(
                &store(),
                FunctionCode::ReadHoldingRegisters,
                &[0x00, 0x00, 0x00, 0x7E],
            )
            .unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn out_of_range_read_is_illegal_data_address() {
        assert_eq!(
            run(
                &store(),
                FunctionCode::ReadHoldingRegisters,
                &[0x00, 0x63, 0x00, 0x02],
            )
            .unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn write_single_coil_echoes_and_applies() {
        let store = store();
        let pdu = run(
            &store,
            FunctionCode::WriteSingleCoil,
            &[0x00, 0x0A, 0xFF, 0x00],
        )
        .unwrap();
        assert_eq!(pdu.as_slice(), &[0x05, 0x00, 0x0A, 0xFF, 0x00]);

        let coils = run(&store, FunctionCode::ReadCoils, &[0x00, 0x0A, 0x00, 0x01]).unwrap();
        assert_eq!(coils.as_slice(), &[0x01, 0x01, 0x01]);
    }

    #[test]
    fn write_single_coil_rejects_other_values() {
        assert_eq!(
            run(
                &store(),
                FunctionCode::WriteSingleCoil,
                &[0x00, 0x0A, 0x12, 0x34],
            )
            .unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn mask_write_register_reference_case() {
        let store = store();
        store.set_holding_register(40, 0x0012).unwrap();

        let payload = [0x00, 0x28, 0x00, 0xF2, 0x00, 0x25];
        let pdu = run(&store, FunctionCode::MaskWriteRegister, &payload).unwrap();
        assert_eq!(&pdu.as_slice()[1..], &payload);

        let value = run(
            &store,
            FunctionCode::ReadHoldingRegisters,
            &[0x00, 0x28, 0x00, 0x01],
        )
        .unwrap();
        assert_eq!(value.as_slice(), &[0x03, 0x02, 0x00, 0x17]);
    }

    #[test]
    fn read_write_observes_overlapping_write() {
        let store = store();
        // write [7, 8] at 2, read 2..=3
        let payload = [
            0x00, 0x02, 0x00, 0x02, 0x00, 0x02, 0x00, 0x02, 0x04, 0x00, 0x07, 0x00, 0x08,
        ];
        let pdu = run(&store, FunctionCode::ReadWriteMultipleRegisters, &payload).unwrap();
        assert_eq!(pdu.as_slice(), &[0x17, 0x04, 0x00, 0x07, 0x00, 0x08]);
    }

    #[test]
    fn write_multiple_coils_byte_count_must_match_quantity() {
        assert_eq!(
            run(
                &store(),
                FunctionCode::WriteMultipleCoils,
                &[0x00, 0x00, 0x00, 0x0A, 0x01, 0xCD],
            )
            .unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn serves_fifo_queue() {
        let store = store();
        store.set_fifo_queue(4, &[0x01B8, 0x1284]).unwrap();

        let pdu = run(&store, FunctionCode::ReadFifoQueue, &[0x00, 0x04]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x18, 0x00, 0x06, 0x00, 0x02, 0x01, 0xB8, 0x12, 0x84]
        );
    }

    #[test]
    fn serves_file_record_round_trip() {
        let store = store();

        let write_payload = [
            0x0D, 0x06, 0x00, 0x04, 0x00, 0x07, 0x00, 0x03, 0x06, 0xAF, 0x04, 0xBE, 0x10, 0x0D,
        ];
        let echoed = run(&store, FunctionCode::WriteFileRecord, &write_payload).unwrap();
        assert_eq!(&echoed.as_slice()[1..], &write_payload);

        let read_payload = [0x07, 0x06, 0x00, 0x04, 0x00, 0x07, 0x00, 0x03];
        let pdu = run(&store, FunctionCode::ReadFileRecord, &read_payload).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x14, 0x08, 0x07, 0x06, 0x06, 0xAF, 0x04, 0xBE, 0x10, 0x0D]
        );
    }

    #[test]
    fn serves_device_identification() {
        let pdu = run(
            &store(),
            FunctionCode::EncapsulatedInterface,
            &[0x0E, 0x01, 0x00],
        )
        .unwrap();

        let mut expected = vec![0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x03];
        expected.extend_from_slice(&[0x00, 0x04]);
        expected.extend_from_slice(b"Acme");
        expected.extend_from_slice(&[0x01, 0x05]);
        expected.extend_from_slice(b"AC-42");
        expected.extend_from_slice(&[0x02, 0x03]);
        expected.extend_from_slice(b"2.1");
        assert_eq!(pdu.as_slice(), expected.as_slice());
    }

    #[test]
    fn specific_access_to_missing_object_is_illegal_data_address() {
        assert_eq!(
            run(
                &store(),
                FunctionCode::EncapsulatedInterface,
                &[0x0E, 0x04, 0x05],
            )
            .unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn unknown_mei_type_is_illegal_function() {
        assert_eq!(
            run(
                &store(),
                FunctionCode::EncapsulatedInterface,
                &[0x0D, 0x01, 0x00],
            )
            .unwrap_err(),
            ExceptionCode::IllegalFunction
        );
    }

    #[test]
    fn diagnostics_echo_round_trips() {
        let pdu = run(
            &store(),
            FunctionCode::Diagnostics,
            &[0x00, 0x00, 0xA5, 0x37],
        )
        .unwrap();
        assert_eq!(pdu.as_slice(), &[0x08, 0x00, 0x00, 0xA5, 0x37]);
    }
}
