use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::constants::{diagnostics, limits};
use crate::exception::ExceptionCode;
use crate::server::handler::DataStore;
use crate::types::{
    AddressRange, CommEventCounter, CommEventLog, DiagnosticCounters, FileRecord, ServerId,
};

/// Server status word: the reference store is never busy with a
/// long-duration program command
const STATUS_READY: u16 = 0xFFFF;

#[derive(Default)]
struct DiagnosticState {
    counters: DiagnosticCounters,
    register: u16,
    event_log: Vec<u8>,
    listen_only: bool,
}

/// In-memory reference implementation of the full [`DataStore`] capability
/// set.
///
/// Each logical region sits behind its own reader-writer lock, so readers on
/// distinct connections proceed in parallel while writers are exclusive. The
/// compound operations (mask-write, read-write-registers) hold the holding
/// register write lock for their whole duration.
pub struct MemoryStore {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
    file_records: RwLock<BTreeMap<u16, BTreeMap<u16, Vec<u16>>>>,
    fifo_queues: RwLock<BTreeMap<u16, Vec<u16>>>,
    exception_status: RwLock<u8>,
    diagnostics: RwLock<DiagnosticState>,
    server_id: RwLock<ServerId>,
}

fn check_range<T>(slice: &[T], range: AddressRange) -> Result<std::ops::Range<usize>, ExceptionCode> {
    let std_range = range.to_std_range();
    if std_range.end > slice.len() {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(std_range)
}

fn check_write_range<T>(
    slice: &[T],
    start: u16,
    count: usize,
) -> Result<std::ops::Range<usize>, ExceptionCode> {
    let begin = start as usize;
    let end = begin
        .checked_add(count)
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    if end > slice.len() {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(begin..end)
}

impl MemoryStore {
    /// Create a store with the given region sizes, all zeroed
    pub fn new(
        coil_count: usize,
        discrete_input_count: usize,
        holding_register_count: usize,
        input_register_count: usize,
    ) -> Self {
        Self {
            coils: RwLock::new(vec![false; coil_count]),
            discrete_inputs: RwLock::new(vec![false; discrete_input_count]),
            holding_registers: RwLock::new(vec![0; holding_register_count]),
            input_registers: RwLock::new(vec![0; input_register_count]),
            file_records: RwLock::new(BTreeMap::new()),
            fifo_queues: RwLock::new(BTreeMap::new()),
            exception_status: RwLock::new(0),
            diagnostics: RwLock::new(DiagnosticState::default()),
            server_id: RwLock::new(ServerId {
                server_id: b"ferrobus server".to_vec(),
                run_indicator: true,
            }),
        }
    }

    /// Seed a single coil
    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        let mut coils = self.coils.write().unwrap();
        let range = check_write_range(&coils, address, 1)?;
        coils[range.start] = value;
        Ok(())
    }

    /// Seed a single discrete input
    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        let mut inputs = self.discrete_inputs.write().unwrap();
        let range = check_write_range(&inputs, address, 1)?;
        inputs[range.start] = value;
        Ok(())
    }

    /// Seed a single holding register
    pub fn set_holding_register(&self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        let mut registers = self.holding_registers.write().unwrap();
        let range = check_write_range(&registers, address, 1)?;
        registers[range.start] = value;
        Ok(())
    }

    /// Seed a single input register
    pub fn set_input_register(&self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        let mut registers = self.input_registers.write().unwrap();
        let range = check_write_range(&registers, address, 1)?;
        registers[range.start] = value;
        Ok(())
    }

    /// Replace the FIFO queue registered at `address` (at most 31 values)
    pub fn set_fifo_queue(&self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        if values.len() > limits::MAX_FIFO_COUNT as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.fifo_queues
            .write()
            .unwrap()
            .insert(address, values.to_vec());
        Ok(())
    }

    /// Replace the exception status byte
    pub fn set_exception_status(&self, status: u8) {
        *self.exception_status.write().unwrap() = status;
    }

    /// Replace the reported server id and run status
    pub fn set_server_id(&self, server_id: &[u8], run_indicator: bool) {
        *self.server_id.write().unwrap() = ServerId {
            server_id: server_id.to_vec(),
            run_indicator,
        };
    }

    /// Mutate the diagnostic counters, for instrumentation by the embedding
    /// application
    pub fn update_counters(&self, f: impl FnOnce(&mut DiagnosticCounters)) {
        f(&mut self.diagnostics.write().unwrap().counters)
    }

    /// A copy of the current diagnostic counters
    pub fn counters(&self) -> DiagnosticCounters {
        self.diagnostics.read().unwrap().counters
    }

    /// Append an event byte to the communication event log
    pub fn push_comm_event(&self, event: u8) {
        let mut state = self.diagnostics.write().unwrap();
        state.event_log.insert(0, event);
        // the log reports at most 64 of the newest events
        state.event_log.truncate(64);
    }

    /// True once a force-listen-only diagnostic request has been processed
    pub fn listen_only(&self) -> bool {
        self.diagnostics.read().unwrap().listen_only
    }
}

impl DataStore for MemoryStore {
    fn read_coils(&self, range: AddressRange) -> Result<Vec<bool>, ExceptionCode> {
        let coils = self.coils.read().unwrap();
        let std_range = check_range(&coils, range)?;
        Ok(coils[std_range].to_vec())
    }

    fn write_coils(&self, start: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        let mut coils = self.coils.write().unwrap();
        let range = check_write_range(&coils, start, values.len())?;
        coils[range].copy_from_slice(values);
        Ok(())
    }

    fn read_discrete_inputs(&self, range: AddressRange) -> Result<Vec<bool>, ExceptionCode> {
        let inputs = self.discrete_inputs.read().unwrap();
        let std_range = check_range(&inputs, range)?;
        Ok(inputs[std_range].to_vec())
    }

    fn read_holding_registers(&self, range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        let registers = self.holding_registers.read().unwrap();
        let std_range = check_range(&registers, range)?;
        Ok(registers[std_range].to_vec())
    }

    fn write_holding_registers(&self, start: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let mut registers = self.holding_registers.write().unwrap();
        let range = check_write_range(&registers, start, values.len())?;
        registers[range].copy_from_slice(values);
        Ok(())
    }

    fn read_input_registers(&self, range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        let registers = self.input_registers.read().unwrap();
        let std_range = check_range(&registers, range)?;
        Ok(registers[std_range].to_vec())
    }

    fn mask_write_register(
        &self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), ExceptionCode> {
        // the write lock spans the read-modify-write
        let mut registers = self.holding_registers.write().unwrap();
        let range = check_write_range(&registers, address, 1)?;
        let current = registers[range.start];
        registers[range.start] = (current & and_mask) | (or_mask & !and_mask);
        Ok(())
    }

    fn read_write_registers(
        &self,
        read: AddressRange,
        write_start: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, ExceptionCode> {
        // write first, then read, without releasing the lock in between so
        // the read observes the freshly written values and nothing newer
        let mut registers = self.holding_registers.write().unwrap();
        let write_range = check_write_range(&registers, write_start, values.len())?;
        let read_range = check_range(&registers, read)?;

        registers[write_range].copy_from_slice(values);
        Ok(registers[read_range].to_vec())
    }

    fn read_file_records(
        &self,
        requests: &[FileRecord],
    ) -> Result<Vec<FileRecord>, ExceptionCode> {
        let files = self.file_records.read().unwrap();

        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let file = files
                .get(&request.file_number)
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            let data = file
                .get(&request.record_number)
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            if data.len() < request.record_length as usize {
                return Err(ExceptionCode::IllegalDataAddress);
            }

            results.push(FileRecord {
                file_number: request.file_number,
                record_number: request.record_number,
                record_length: request.record_length,
                record_data: data[..request.record_length as usize].to_vec(),
            });
        }
        Ok(results)
    }

    fn write_file_records(&self, records: &[FileRecord]) -> Result<(), ExceptionCode> {
        let mut files = self.file_records.write().unwrap();
        for record in records {
            files
                .entry(record.file_number)
                .or_default()
                .insert(record.record_number, record.record_data.clone());
        }
        Ok(())
    }

    fn read_fifo_queue(&self, address: u16) -> Result<Vec<u16>, ExceptionCode> {
        let queues = self.fifo_queues.read().unwrap();
        Ok(queues.get(&address).cloned().unwrap_or_default())
    }

    fn read_exception_status(&self) -> Result<u8, ExceptionCode> {
        Ok(*self.exception_status.read().unwrap())
    }

    fn diagnostics(&self, sub_function: u16, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        let mut state = self.diagnostics.write().unwrap();

        match sub_function {
            diagnostics::RETURN_QUERY_DATA => Ok(data.to_vec()),
            diagnostics::RESTART_COMMUNICATIONS_OPTION => {
                state.counters.clear();
                state.event_log.clear();
                state.listen_only = false;
                Ok(data.to_vec())
            }
            diagnostics::RETURN_DIAGNOSTIC_REGISTER => Ok(state.register.to_be_bytes().to_vec()),
            diagnostics::FORCE_LISTEN_ONLY_MODE => {
                state.listen_only = true;
                Ok(data.to_vec())
            }
            diagnostics::CLEAR_COUNTERS_AND_DIAGNOSTIC_REGISTER => {
                state.counters.clear();
                state.register = 0;
                Ok(data.to_vec())
            }
            diagnostics::RETURN_BUS_MESSAGE_COUNT => {
                Ok(state.counters.bus_message.to_be_bytes().to_vec())
            }
            diagnostics::RETURN_BUS_COMM_ERROR_COUNT => {
                Ok(state.counters.bus_comm_error.to_be_bytes().to_vec())
            }
            diagnostics::RETURN_BUS_EXCEPTION_ERROR_COUNT => {
                Ok(state.counters.bus_exception.to_be_bytes().to_vec())
            }
            diagnostics::RETURN_SERVER_MESSAGE_COUNT => {
                Ok(state.counters.server_message.to_be_bytes().to_vec())
            }
            diagnostics::RETURN_SERVER_NO_RESPONSE_COUNT => {
                Ok(state.counters.server_no_response.to_be_bytes().to_vec())
            }
            diagnostics::RETURN_SERVER_NAK_COUNT => {
                Ok(state.counters.server_nak.to_be_bytes().to_vec())
            }
            diagnostics::RETURN_SERVER_BUSY_COUNT => {
                Ok(state.counters.server_busy.to_be_bytes().to_vec())
            }
            diagnostics::RETURN_BUS_CHAR_OVERRUN_COUNT => {
                Ok(state.counters.bus_char_overrun.to_be_bytes().to_vec())
            }
            diagnostics::CLEAR_OVERRUN_COUNTER => {
                state.counters.bus_char_overrun = 0;
                Ok(data.to_vec())
            }
            _ => Err(ExceptionCode::IllegalFunction),
        }
    }

    fn comm_event_counter(&self) -> Result<CommEventCounter, ExceptionCode> {
        let state = self.diagnostics.read().unwrap();
        Ok(CommEventCounter {
            status: STATUS_READY,
            event_count: state.counters.bus_message,
        })
    }

    fn comm_event_log(&self) -> Result<CommEventLog, ExceptionCode> {
        let state = self.diagnostics.read().unwrap();
        Ok(CommEventLog {
            status: STATUS_READY,
            event_count: state.counters.bus_message,
            message_count: state.counters.server_message,
            events: state.event_log.clone(),
        })
    }

    fn server_id(&self) -> Result<ServerId, ExceptionCode> {
        Ok(self.server_id.read().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    #[test]
    fn reads_out_of_range_yield_illegal_data_address() {
        let store = MemoryStore::new(10, 10, 10, 10);
        assert_eq!(
            store.read_coils(range(8, 3)).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            store.read_holding_registers(range(10, 1)).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn write_then_read_coils() {
        let store = MemoryStore::new(16, 0, 0, 0);
        store.write_coils(3, &[true, true, false, true]).unwrap();
        assert_eq!(
            store.read_coils(range(3, 4)).unwrap(),
            vec![true, true, false, true]
        );
    }

    #[test]
    fn mask_write_applies_the_specified_formula() {
        let store = MemoryStore::new(0, 0, 64, 0);
        store.set_holding_register(40, 0x0012).unwrap();
        store.mask_write_register(40, 0x00F2, 0x0025).unwrap();
        assert_eq!(
            store.read_holding_registers(range(40, 1)).unwrap(),
            vec![0x0017]
        );
    }

    #[test]
    fn read_write_registers_observes_the_write() {
        let store = MemoryStore::new(0, 0, 16, 0);
        let read = store
            .read_write_registers(range(2, 4), 4, &[7, 8])
            .unwrap();
        assert_eq!(read, vec![0, 0, 7, 8]);
    }

    #[test]
    fn file_records_round_trip() {
        let store = MemoryStore::new(0, 0, 0, 0);
        store
            .write_file_records(&[FileRecord::write(4, 7, vec![1, 2, 3])])
            .unwrap();
        let records = store
            .read_file_records(&[FileRecord::read(4, 7, 3)])
            .unwrap();
        assert_eq!(records[0].record_data, vec![1, 2, 3]);

        assert_eq!(
            store
                .read_file_records(&[FileRecord::read(5, 0, 1)])
                .unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn fifo_queue_is_bounded() {
        let store = MemoryStore::new(0, 0, 0, 0);
        assert_eq!(
            store.set_fifo_queue(0, &[0; 32]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
        store.set_fifo_queue(0, &[1, 2, 3]).unwrap();
        assert_eq!(store.read_fifo_queue(0).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.read_fifo_queue(9).unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn restart_communications_clears_counters_and_log() {
        let store = MemoryStore::new(0, 0, 0, 0);
        store.update_counters(|counters| counters.bus_message = 17);
        store.push_comm_event(0x20);

        let echoed = store
            .diagnostics(diagnostics::RETURN_QUERY_DATA, &[0xA5, 0x37])
            .unwrap();
        assert_eq!(echoed, vec![0xA5, 0x37]);

        assert_eq!(
            store
                .diagnostics(diagnostics::RETURN_BUS_MESSAGE_COUNT, &[0, 0])
                .unwrap(),
            vec![0x00, 0x11]
        );

        store
            .diagnostics(diagnostics::RESTART_COMMUNICATIONS_OPTION, &[0, 0])
            .unwrap();
        assert_eq!(store.counters(), DiagnosticCounters::default());
        assert!(store.comm_event_log().unwrap().events.is_empty());
    }

    #[test]
    fn unknown_diagnostic_sub_function_is_rejected() {
        let store = MemoryStore::new(0, 0, 0, 0);
        assert_eq!(
            store.diagnostics(0x7777, &[]).unwrap_err(),
            ExceptionCode::IllegalFunction
        );
    }

    #[test]
    fn force_listen_only_is_recorded() {
        let store = MemoryStore::new(0, 0, 0, 0);
        assert!(!store.listen_only());
        store
            .diagnostics(diagnostics::FORCE_LISTEN_ONLY_MODE, &[0, 0])
            .unwrap();
        assert!(store.listen_only());
    }
}
