pub(crate) mod request;
pub(crate) mod response;

use crate::common::frame::constants::MAX_PDU_SIZE;
use crate::error::InternalError;

mod fc {
    pub(crate) const READ_COILS: u8 = 1;
    pub(crate) const READ_DISCRETE_INPUTS: u8 = 2;
    pub(crate) const READ_HOLDING_REGISTERS: u8 = 3;
    pub(crate) const READ_INPUT_REGISTERS: u8 = 4;
    pub(crate) const WRITE_SINGLE_COIL: u8 = 5;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 6;
    pub(crate) const READ_EXCEPTION_STATUS: u8 = 7;
    pub(crate) const DIAGNOSTICS: u8 = 8;
    pub(crate) const GET_COMM_EVENT_COUNTER: u8 = 11;
    pub(crate) const GET_COMM_EVENT_LOG: u8 = 12;
    pub(crate) const WRITE_MULTIPLE_COILS: u8 = 15;
    pub(crate) const WRITE_MULTIPLE_REGISTERS: u8 = 16;
    pub(crate) const REPORT_SERVER_ID: u8 = 17;
    pub(crate) const READ_FILE_RECORD: u8 = 20;
    pub(crate) const WRITE_FILE_RECORD: u8 = 21;
    pub(crate) const MASK_WRITE_REGISTER: u8 = 22;
    pub(crate) const READ_WRITE_MULTIPLE_REGISTERS: u8 = 23;
    pub(crate) const READ_FIFO_QUEUE: u8 = 24;
    pub(crate) const ENCAPSULATED_INTERFACE: u8 = 43;
}

/// The function codes supported by this engine, in both directions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read a contiguous block of coils (1)
    ReadCoils = fc::READ_COILS,
    /// Read a contiguous block of discrete inputs (2)
    ReadDiscreteInputs = fc::READ_DISCRETE_INPUTS,
    /// Read a contiguous block of holding registers (3)
    ReadHoldingRegisters = fc::READ_HOLDING_REGISTERS,
    /// Read a contiguous block of input registers (4)
    ReadInputRegisters = fc::READ_INPUT_REGISTERS,
    /// Write a single coil (5)
    WriteSingleCoil = fc::WRITE_SINGLE_COIL,
    /// Write a single holding register (6)
    WriteSingleRegister = fc::WRITE_SINGLE_REGISTER,
    /// Read the exception status byte (7, serial-line semantics)
    ReadExceptionStatus = fc::READ_EXCEPTION_STATUS,
    /// Diagnostic sub-functions (8)
    Diagnostics = fc::DIAGNOSTICS,
    /// Get the communication event counter (11)
    GetCommEventCounter = fc::GET_COMM_EVENT_COUNTER,
    /// Get the communication event log (12)
    GetCommEventLog = fc::GET_COMM_EVENT_LOG,
    /// Write a contiguous block of coils (15)
    WriteMultipleCoils = fc::WRITE_MULTIPLE_COILS,
    /// Write a contiguous block of holding registers (16)
    WriteMultipleRegisters = fc::WRITE_MULTIPLE_REGISTERS,
    /// Report the server id and run status (17)
    ReportServerId = fc::REPORT_SERVER_ID,
    /// Read file records (20)
    ReadFileRecord = fc::READ_FILE_RECORD,
    /// Write file records (21)
    WriteFileRecord = fc::WRITE_FILE_RECORD,
    /// Modify a holding register with AND/OR masks (22)
    MaskWriteRegister = fc::MASK_WRITE_REGISTER,
    /// Write then read holding registers in a single transaction (23)
    ReadWriteMultipleRegisters = fc::READ_WRITE_MULTIPLE_REGISTERS,
    /// Read a first-in-first-out queue of registers (24)
    ReadFifoQueue = fc::READ_FIFO_QUEUE,
    /// Encapsulated interface transport, MEI type 14 = device identification (43)
    EncapsulatedInterface = fc::ENCAPSULATED_INTERFACE,
}

impl FunctionCode {
    /// The raw value of the function code
    pub const fn get_value(self) -> u8 {
        self as u8
    }

    /// The exception form of the function code (high bit set)
    pub const fn as_error(self) -> u8 {
        self.get_value() | 0x80
    }

    /// Look up a function code from its raw value
    pub fn get(value: u8) -> Option<Self> {
        match value {
            fc::READ_COILS => Some(FunctionCode::ReadCoils),
            fc::READ_DISCRETE_INPUTS => Some(FunctionCode::ReadDiscreteInputs),
            fc::READ_HOLDING_REGISTERS => Some(FunctionCode::ReadHoldingRegisters),
            fc::READ_INPUT_REGISTERS => Some(FunctionCode::ReadInputRegisters),
            fc::WRITE_SINGLE_COIL => Some(FunctionCode::WriteSingleCoil),
            fc::WRITE_SINGLE_REGISTER => Some(FunctionCode::WriteSingleRegister),
            fc::READ_EXCEPTION_STATUS => Some(FunctionCode::ReadExceptionStatus),
            fc::DIAGNOSTICS => Some(FunctionCode::Diagnostics),
            fc::GET_COMM_EVENT_COUNTER => Some(FunctionCode::GetCommEventCounter),
            fc::GET_COMM_EVENT_LOG => Some(FunctionCode::GetCommEventLog),
            fc::WRITE_MULTIPLE_COILS => Some(FunctionCode::WriteMultipleCoils),
            fc::WRITE_MULTIPLE_REGISTERS => Some(FunctionCode::WriteMultipleRegisters),
            fc::REPORT_SERVER_ID => Some(FunctionCode::ReportServerId),
            fc::READ_FILE_RECORD => Some(FunctionCode::ReadFileRecord),
            fc::WRITE_FILE_RECORD => Some(FunctionCode::WriteFileRecord),
            fc::MASK_WRITE_REGISTER => Some(FunctionCode::MaskWriteRegister),
            fc::READ_WRITE_MULTIPLE_REGISTERS => Some(FunctionCode::ReadWriteMultipleRegisters),
            fc::READ_FIFO_QUEUE => Some(FunctionCode::ReadFifoQueue),
            fc::ENCAPSULATED_INTERFACE => Some(FunctionCode::EncapsulatedInterface),
            _ => None,
        }
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "READ COILS",
            FunctionCode::ReadDiscreteInputs => "READ DISCRETE INPUTS",
            FunctionCode::ReadHoldingRegisters => "READ HOLDING REGISTERS",
            FunctionCode::ReadInputRegisters => "READ INPUT REGISTERS",
            FunctionCode::WriteSingleCoil => "WRITE SINGLE COIL",
            FunctionCode::WriteSingleRegister => "WRITE SINGLE REGISTER",
            FunctionCode::ReadExceptionStatus => "READ EXCEPTION STATUS",
            FunctionCode::Diagnostics => "DIAGNOSTICS",
            FunctionCode::GetCommEventCounter => "GET COMM EVENT COUNTER",
            FunctionCode::GetCommEventLog => "GET COMM EVENT LOG",
            FunctionCode::WriteMultipleCoils => "WRITE MULTIPLE COILS",
            FunctionCode::WriteMultipleRegisters => "WRITE MULTIPLE REGISTERS",
            FunctionCode::ReportServerId => "REPORT SERVER ID",
            FunctionCode::ReadFileRecord => "READ FILE RECORD",
            FunctionCode::WriteFileRecord => "WRITE FILE RECORD",
            FunctionCode::MaskWriteRegister => "MASK WRITE REGISTER",
            FunctionCode::ReadWriteMultipleRegisters => "READ WRITE MULTIPLE REGISTERS",
            FunctionCode::ReadFifoQueue => "READ FIFO QUEUE",
            FunctionCode::EncapsulatedInterface => "ENCAPSULATED INTERFACE",
        };
        write!(f, "{} ({:#04X})", name, self.get_value())
    }
}

/// A protocol data unit: one function code byte followed by at most 252
/// payload bytes, held in a fixed stack buffer
#[derive(Clone, PartialEq)]
pub struct Pdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl Pdu {
    /// Create a PDU holding only a function code
    pub(crate) fn new(function: u8) -> Self {
        let mut data = [0; MAX_PDU_SIZE];
        data[0] = function;
        Self { data, len: 1 }
    }

    /// Create a PDU from raw wire bytes
    pub(crate) fn from_slice(data: &[u8]) -> Result<Self, InternalError> {
        if data.is_empty() || data.len() > MAX_PDU_SIZE {
            return Err(InternalError::AduTooBig(data.len()));
        }
        let mut pdu = Self::new(data[0]);
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Create an exception response PDU
    pub(crate) fn exception(function: u8, code: crate::exception::ExceptionCode) -> Self {
        let mut pdu = Self::new(function | 0x80);
        pdu.data[1] = code.into();
        pdu.len = 2;
        pdu
    }

    pub(crate) fn push(&mut self, byte: u8) -> Result<(), InternalError> {
        if self.len >= MAX_PDU_SIZE {
            return Err(InternalError::AduTooBig(self.len + 1));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    pub(crate) fn push_u16(&mut self, value: u16) -> Result<(), InternalError> {
        self.push((value >> 8) as u8)?;
        self.push(value as u8)
    }

    pub(crate) fn extend(&mut self, data: &[u8]) -> Result<(), InternalError> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(InternalError::AduTooBig(self.len + data.len()));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// The complete PDU bytes, function code first
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The function code byte
    pub fn function(&self) -> u8 {
        self.data[0]
    }

    /// The payload bytes following the function code
    pub fn payload(&self) -> &[u8] {
        &self.data[1..self.len]
    }

    /// True when the function code carries the exception flag
    pub fn is_exception(&self) -> bool {
        self.function() & 0x80 != 0
    }
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Pdu({:02X?})", self.as_slice())
    }
}
