use crate::exception::ExceptionCode;
use crate::types::{AddressRange, CommEventCounter, CommEventLog, FileRecord, ServerId};

/// The capability set a server dispatches into.
///
/// Every method defaults to `IllegalFunction`, so an implementation only
/// overrides the capabilities the device actually has; each capability is
/// individually substitutable for tests. Errors pass through to the wire
/// verbatim: return the exception code the client should see, and translate
/// any internal failure to [`ExceptionCode::ServerDeviceFailure`] yourself.
///
/// Methods take `&self` because connections are served concurrently;
/// implementations guard their state internally (see
/// [`crate::server::MemoryStore`] for the reference locking scheme).
pub trait DataStore: Send + Sync + 'static {
    /// Read a range of coils
    fn read_coils(&self, range: AddressRange) -> Result<Vec<bool>, ExceptionCode> {
        let _ = range;
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write a range of coils starting at `start`
    fn write_coils(&self, start: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        let _ = (start, values);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read a range of discrete inputs
    fn read_discrete_inputs(&self, range: AddressRange) -> Result<Vec<bool>, ExceptionCode> {
        let _ = range;
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read a range of holding registers
    fn read_holding_registers(&self, range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        let _ = range;
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write a range of holding registers starting at `start`
    fn write_holding_registers(&self, start: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let _ = (start, values);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read a range of input registers
    fn read_input_registers(&self, range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        let _ = range;
        Err(ExceptionCode::IllegalFunction)
    }

    /// Atomically apply `(current & and_mask) | (or_mask & !and_mask)` to the
    /// holding register at `address`. The read-modify-write must be
    /// serialized against other writers of the same register.
    fn mask_write_register(
        &self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), ExceptionCode> {
        let _ = (address, and_mask, or_mask);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write `values` at `write_start`, then read `read` from the holding
    /// registers, as one atomic operation. A read overlapping the write
    /// observes the newly written values.
    fn read_write_registers(
        &self,
        read: AddressRange,
        write_start: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, ExceptionCode> {
        let _ = (read, write_start, values);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read the requested file records
    fn read_file_records(
        &self,
        requests: &[FileRecord],
    ) -> Result<Vec<FileRecord>, ExceptionCode> {
        let _ = requests;
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write the given file records
    fn write_file_records(&self, records: &[FileRecord]) -> Result<(), ExceptionCode> {
        let _ = records;
        Err(ExceptionCode::IllegalFunction)
    }

    /// Drain the FIFO queue registered at `address` (up to 31 values)
    fn read_fifo_queue(&self, address: u16) -> Result<Vec<u16>, ExceptionCode> {
        let _ = address;
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read the exception status byte
    fn read_exception_status(&self) -> Result<u8, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Execute a diagnostic sub-function, returning the data that follows
    /// the echoed sub-function code in the response
    fn diagnostics(&self, sub_function: u16, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        let _ = (sub_function, data);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read the communication event counter
    fn comm_event_counter(&self) -> Result<CommEventCounter, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read the communication event log
    fn comm_event_log(&self) -> Result<CommEventLog, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Report the device specific server id and run status
    fn server_id(&self) -> Result<ServerId, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }
}
