use crate::constants::{coil, file, limits};
use crate::error::InvalidRequest;

/// Modbus unit identifier, a type-safe wrapper around `u8`
///
/// The value 0 is the broadcast address. Values 248..=255 are reserved by the
/// specification and should not be used to address devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }

    /// The broadcast address (0): all slaves, no response
    pub fn broadcast() -> Self {
        Self { value: 0 }
    }

    /// Returns true if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        self.value == 0
    }

    /// Returns true if the address is reserved by the specification
    pub fn is_reserved(&self) -> bool {
        self.value >= 248
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

/// Start and count tuple used when making various requests
///
/// Cannot be constructed with a zero count or a range that overflows the
/// 16-bit address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

impl AddressRange {
    /// Create a new address range, validating `count > 0` and
    /// `start + count <= 65536`
    pub fn try_from(start: u16, count: u16) -> Result<Self, InvalidRequest> {
        if count == 0 {
            return Err(InvalidRequest::CountOfZero);
        }

        let max_start = u16::MAX - (count - 1);
        if start > max_start {
            return Err(InvalidRequest::AddressOverflow(start, count));
        }

        Ok(Self { start, count })
    }

    /// Converts to a `std::ops::Range` suitable for slice indexing
    pub fn to_std_range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        start..start + self.count as usize
    }

    pub(crate) fn limited(self, max: u16) -> Result<Self, InvalidRequest> {
        if self.count > max {
            return Err(InvalidRequest::CountTooBigForType(self.count, max));
        }
        Ok(self)
    }

    pub(crate) fn of_read_bits(self) -> Result<Self, InvalidRequest> {
        self.limited(limits::MAX_READ_COILS_COUNT)
    }

    pub(crate) fn of_read_registers(self) -> Result<Self, InvalidRequest> {
        self.limited(limits::MAX_READ_REGISTERS_COUNT)
    }

    pub(crate) fn of_write_bits(self) -> Result<Self, InvalidRequest> {
        self.limited(limits::MAX_WRITE_COILS_COUNT)
    }

    pub(crate) fn of_write_registers(self) -> Result<Self, InvalidRequest> {
        self.limited(limits::MAX_WRITE_REGISTERS_COUNT)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

/// Value and its address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Indexed<T> {
    /// Address of the value
    pub index: u16,
    /// Associated value
    pub value: T,
}

impl<T> Indexed<T> {
    /// Create a new indexed value
    pub fn new(index: u16, value: T) -> Self {
        Indexed { index, value }
    }
}

impl<T> From<(u16, T)> for Indexed<T>
where
    T: Copy,
{
    fn from(tuple: (u16, T)) -> Self {
        let (index, value) = tuple;
        Self::new(index, value)
    }
}

impl std::fmt::Display for Indexed<bool> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {}", self.index, self.value as i32)
    }
}

impl std::fmt::Display for Indexed<u16> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {:#06X}", self.index, self.value)
    }
}

pub(crate) fn coil_from_u16(value: u16) -> Result<bool, crate::error::AduParseError> {
    match value {
        coil::ON => Ok(true),
        coil::OFF => Ok(false),
        _ => Err(crate::error::AduParseError::UnknownCoilState(value)),
    }
}

pub(crate) fn coil_to_u16(value: bool) -> u16 {
    if value {
        coil::ON
    } else {
        coil::OFF
    }
}

/// A single file record sub-request or sub-response (function codes 20 and 21)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// File number, 1..=65535
    pub file_number: u16,
    /// Record number within the file, 0..=9999
    pub record_number: u16,
    /// Count of 16-bit registers in the record
    pub record_length: u16,
    /// Record data, used for writes and carried back by reads
    pub record_data: Vec<u16>,
}

impl FileRecord {
    /// Create a read sub-request for `record_length` registers
    pub fn read(file_number: u16, record_number: u16, record_length: u16) -> Self {
        Self {
            file_number,
            record_number,
            record_length,
            record_data: Vec::new(),
        }
    }

    /// Create a write sub-request carrying `record_data`
    pub fn write(file_number: u16, record_number: u16, record_data: Vec<u16>) -> Self {
        Self {
            file_number,
            record_number,
            record_length: record_data.len() as u16,
            record_data,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), InvalidRequest> {
        if self.record_number > file::MAX_RECORD_NUMBER {
            return Err(InvalidRequest::BadRecordNumber(self.record_number));
        }
        Ok(())
    }

    pub(crate) fn validate_write(&self) -> Result<(), InvalidRequest> {
        self.validate()?;
        if self.record_length as usize != self.record_data.len() {
            return Err(InvalidRequest::RecordLengthMismatch(
                self.record_length,
                self.record_data.len(),
            ));
        }
        Ok(())
    }
}

/// Access level requested when reading device identification (function code 43/14)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadDeviceIdCode {
    /// Stream the basic objects (0x00..=0x02)
    Basic,
    /// Stream the regular objects (0x03..=0x06)
    Regular,
    /// Stream the extended objects (0x80..)
    Extended,
    /// Access one specific object
    Specific,
}

impl ReadDeviceIdCode {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ReadDeviceIdCode::Basic),
            0x02 => Some(ReadDeviceIdCode::Regular),
            0x03 => Some(ReadDeviceIdCode::Extended),
            0x04 => Some(ReadDeviceIdCode::Specific),
            _ => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ReadDeviceIdCode::Basic => 0x01,
            ReadDeviceIdCode::Regular => 0x02,
            ReadDeviceIdCode::Extended => 0x03,
            ReadDeviceIdCode::Specific => 0x04,
        }
    }
}

/// Device identification record (function code 43, MEI type 14)
///
/// The standard objects 0..=6 map to the named fields below. The conformity
/// level advertises which access levels the device supports; 0x01 (basic
/// streaming) is what the reference server reports by default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentification {
    /// Object 0x00, mandatory
    pub vendor_name: String,
    /// Object 0x01, mandatory
    pub product_code: String,
    /// Object 0x02, mandatory
    pub major_minor_revision: String,
    /// Object 0x03
    pub vendor_url: String,
    /// Object 0x04
    pub product_name: String,
    /// Object 0x05
    pub model_name: String,
    /// Object 0x06
    pub user_application_name: String,
    /// Objects outside the standard range, as (object id, raw bytes) pairs
    pub extended_objects: Vec<(u8, Vec<u8>)>,
    /// Supported access levels
    pub conformity_level: u8,
}

impl DeviceIdentification {
    /// Create a record from the three mandatory basic objects
    pub fn basic(vendor_name: &str, product_code: &str, major_minor_revision: &str) -> Self {
        Self {
            vendor_name: vendor_name.to_string(),
            product_code: product_code.to_string(),
            major_minor_revision: major_minor_revision.to_string(),
            vendor_url: String::new(),
            product_name: String::new(),
            model_name: String::new(),
            user_application_name: String::new(),
            extended_objects: Vec::new(),
            conformity_level: 0x01,
        }
    }

    /// Standard objects in id order, skipping empty optional ones
    pub(crate) fn objects(&self) -> Vec<(u8, &str)> {
        use crate::constants::device_id;
        let all = [
            (device_id::VENDOR_NAME, self.vendor_name.as_str()),
            (device_id::PRODUCT_CODE, self.product_code.as_str()),
            (
                device_id::MAJOR_MINOR_REVISION,
                self.major_minor_revision.as_str(),
            ),
            (device_id::VENDOR_URL, self.vendor_url.as_str()),
            (device_id::PRODUCT_NAME, self.product_name.as_str()),
            (device_id::MODEL_NAME, self.model_name.as_str()),
            (
                device_id::USER_APPLICATION_NAME,
                self.user_application_name.as_str(),
            ),
        ];
        all.into_iter()
            .filter(|(id, value)| *id <= 0x02 || !value.is_empty())
            .collect()
    }
}

impl Default for DeviceIdentification {
    fn default() -> Self {
        Self::basic("ferrobus", "FB-1", env!("CARGO_PKG_VERSION"))
    }
}

/// Named diagnostic counters maintained by a server (function code 8)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticCounters {
    /// Messages the server has detected on the bus
    pub bus_message: u16,
    /// CRC/LRC errors the server has detected on the bus
    pub bus_comm_error: u16,
    /// Exception responses the server has returned
    pub bus_exception: u16,
    /// Messages addressed to this server
    pub server_message: u16,
    /// Messages for which the server returned no response
    pub server_no_response: u16,
    /// Negative acknowledgements returned
    pub server_nak: u16,
    /// Busy exceptions returned
    pub server_busy: u16,
    /// Characters lost to overrun
    pub bus_char_overrun: u16,
}

impl DiagnosticCounters {
    /// Reset every counter to zero
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Result of a get-comm-event-log request (function code 12)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommEventLog {
    /// 0xFFFF when the server is ready, 0 while a program command runs
    pub status: u16,
    /// Event counter value
    pub event_count: u16,
    /// Count of messages processed since the last restart
    pub message_count: u16,
    /// The most recent event bytes, newest first
    pub events: Vec<u8>,
}

/// Result of a get-comm-event-counter request (function code 11)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommEventCounter {
    /// 0xFFFF when the server is ready, 0 while a program command runs
    pub status: u16,
    /// Event counter value
    pub event_count: u16,
}

/// Result of a report-server-id request (function code 17)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerId {
    /// Device specific identifier bytes
    pub server_id: Vec<u8>,
    /// True when the run indicator byte is 0xFF
    pub run_indicator: bool,
}

/// The framing/transport variants a client can speak
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportType {
    /// MBAP over TCP
    Tcp,
    /// MBAP over TCP with TLS
    Tls,
    /// MBAP over UDP datagrams
    Udp,
    /// RTU framing over a TCP stream
    RtuOverTcp,
    /// RTU framing over a serial line
    Rtu,
    /// ASCII framing over a serial line
    Ascii,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TransportType::Tcp => f.write_str("tcp"),
            TransportType::Tls => f.write_str("tls"),
            TransportType::Udp => f.write_str("udp"),
            TransportType::RtuOverTcp => f.write_str("rtu-over-tcp"),
            TransportType::Rtu => f.write_str("rtu"),
            TransportType::Ascii => f.write_str("ascii"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_start_max_count_of_one_is_allowed() {
        AddressRange::try_from(u16::MAX, 1).unwrap();
    }

    #[test]
    fn address_maximum_range_is_ok() {
        AddressRange::try_from(0, 0xFFFF).unwrap();
    }

    #[test]
    fn address_count_zero_fails_validation() {
        assert_eq!(
            AddressRange::try_from(0, 0),
            Err(InvalidRequest::CountOfZero)
        );
    }

    #[test]
    fn start_max_count_of_two_overflows() {
        assert_eq!(
            AddressRange::try_from(u16::MAX, 2),
            Err(InvalidRequest::AddressOverflow(u16::MAX, 2))
        );
    }

    #[test]
    fn broadcast_and_reserved_addresses() {
        assert!(UnitId::broadcast().is_broadcast());
        assert!(UnitId::new(248).is_reserved());
        assert!(UnitId::new(255).is_reserved());
        assert!(!UnitId::new(41).is_reserved());
    }

    #[test]
    fn file_record_write_length_must_match_data() {
        let mut record = FileRecord::write(4, 1, vec![1, 2, 3]);
        assert_eq!(record.validate_write(), Ok(()));
        record.record_length = 5;
        assert_eq!(
            record.validate_write(),
            Err(InvalidRequest::RecordLengthMismatch(5, 3))
        );
    }

    #[test]
    fn device_identification_skips_empty_optional_objects() {
        let mut id = DeviceIdentification::basic("Acme", "AC-42", "2.1");
        id.product_name = "Gizmo".to_string();
        let objects = id.objects();
        assert_eq!(objects.len(), 4);
        assert_eq!(objects[3], (0x04, "Gizmo"));
    }
}
