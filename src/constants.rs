/// Maximum count of items allowed in each request type
pub mod limits {
    /// Maximum count of coils in a read request (function code 1)
    pub const MAX_READ_COILS_COUNT: u16 = 2000;
    /// Maximum count of discrete inputs in a read request (function code 2)
    pub const MAX_READ_DISCRETE_INPUTS_COUNT: u16 = 2000;
    /// Maximum count of holding registers in a read request (function code 3)
    pub const MAX_READ_REGISTERS_COUNT: u16 = 125;
    /// Maximum count of coils in a write request (function code 15)
    pub const MAX_WRITE_COILS_COUNT: u16 = 1968;
    /// Maximum count of registers in a write request (function code 16)
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 123;
    /// Maximum count of registers read by a read/write request (function code 23)
    pub const MAX_READ_WRITE_READ_COUNT: u16 = 125;
    /// Maximum count of registers written by a read/write request (function code 23)
    pub const MAX_READ_WRITE_WRITE_COUNT: u16 = 121;
    /// Maximum byte count of sub-requests in a read file record request (function code 20)
    pub const MAX_READ_FILE_RECORD_BYTES: usize = 245;
    /// Maximum byte count of sub-requests in a write file record request (function code 21)
    pub const MAX_WRITE_FILE_RECORD_BYTES: usize = 251;
    /// Maximum count of values in a FIFO queue response (function code 24)
    pub const MAX_FIFO_COUNT: u16 = 31;
}

/// Coil values as they appear on the wire (function code 5)
pub(crate) mod coil {
    pub(crate) const ON: u16 = 0xFF00;
    pub(crate) const OFF: u16 = 0x0000;
}

/// File record constants (function codes 20 and 21)
pub(crate) mod file {
    /// The single reference type defined by the specification
    pub(crate) const REFERENCE_TYPE: u8 = 0x06;
    /// Record numbers are restricted to 0x0000..=0x270F
    pub(crate) const MAX_RECORD_NUMBER: u16 = 9999;
}

/// MEI transport types carried by function code 43
pub(crate) mod mei {
    pub(crate) const DEVICE_IDENTIFICATION: u8 = 0x0E;
}

/// Sub-function codes of the diagnostics function (function code 8)
pub mod diagnostics {
    /// Echo the request data back to the client
    pub const RETURN_QUERY_DATA: u16 = 0x0000;
    /// Restart the communications option, clearing counters and the event log
    pub const RESTART_COMMUNICATIONS_OPTION: u16 = 0x0001;
    /// Return the contents of the diagnostic register
    pub const RETURN_DIAGNOSTIC_REGISTER: u16 = 0x0002;
    /// Force the server into listen-only mode
    pub const FORCE_LISTEN_ONLY_MODE: u16 = 0x0004;
    /// Clear all counters and the diagnostic register
    pub const CLEAR_COUNTERS_AND_DIAGNOSTIC_REGISTER: u16 = 0x000A;
    /// Return the bus message count
    pub const RETURN_BUS_MESSAGE_COUNT: u16 = 0x000B;
    /// Return the bus communication error count
    pub const RETURN_BUS_COMM_ERROR_COUNT: u16 = 0x000C;
    /// Return the bus exception error count
    pub const RETURN_BUS_EXCEPTION_ERROR_COUNT: u16 = 0x000D;
    /// Return the server message count
    pub const RETURN_SERVER_MESSAGE_COUNT: u16 = 0x000E;
    /// Return the server no-response count
    pub const RETURN_SERVER_NO_RESPONSE_COUNT: u16 = 0x000F;
    /// Return the server NAK count
    pub const RETURN_SERVER_NAK_COUNT: u16 = 0x0010;
    /// Return the server busy count
    pub const RETURN_SERVER_BUSY_COUNT: u16 = 0x0011;
    /// Return the bus character overrun count
    pub const RETURN_BUS_CHAR_OVERRUN_COUNT: u16 = 0x0012;
    /// Clear the overrun counter and flag
    pub const CLEAR_OVERRUN_COUNTER: u16 = 0x0014;
}

/// Object ids of the standard device identification objects (function code 43/14)
pub mod device_id {
    /// Name of the vendor of the device
    pub const VENDOR_NAME: u8 = 0x00;
    /// Product code assigned by the vendor
    pub const PRODUCT_CODE: u8 = 0x01;
    /// Software revision in "V.v" form
    pub const MAJOR_MINOR_REVISION: u8 = 0x02;
    /// URL of the vendor
    pub const VENDOR_URL: u8 = 0x03;
    /// Name of the product
    pub const PRODUCT_NAME: u8 = 0x04;
    /// Model of the product
    pub const MODEL_NAME: u8 = 0x05;
    /// Name of the user application
    pub const USER_APPLICATION_NAME: u8 = 0x06;
}
