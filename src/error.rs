use crate::exception::ExceptionCode;
use crate::pdu::FunctionCode;

/// Errors that can occur while making a request or serving one
#[derive(Clone, Debug, PartialEq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying transport
    Io(std::io::ErrorKind),
    /// The server formally rejected the request with an exception response
    Exception(FunctionCode, ExceptionCode),
    /// A frame could not be parsed off the wire
    BadFrame(FrameParseError),
    /// A well-framed response PDU failed validation
    BadResponse(AduParseError),
    /// The request failed validation before any I/O was attempted
    BadRequest(InvalidRequest),
    /// An error that indicates a bug in the library itself
    Internal(InternalError),
    /// The response did not arrive before the response timeout elapsed
    ResponseTimeout,
    /// No connection exists to the remote device
    NoConnection,
    /// Every attempt failed; carries the attempt count and the last underlying error
    ExhaustedRetries(usize, Box<RequestError>),
    /// The task serving the connection has been shut down
    Shutdown,
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "i/o error: {kind:?}"),
            RequestError::Exception(function, code) => {
                write!(f, "{function} failed with exception: {code}")
            }
            RequestError::BadFrame(err) => write!(f, "frame error: {err}"),
            RequestError::BadResponse(err) => write!(f, "response error: {err}"),
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response")
            }
            RequestError::NoConnection => f.write_str("no connection exists to the remote device"),
            RequestError::ExhaustedRetries(attempts, last) => {
                write!(f, "request failed after {attempts} attempts: {last}")
            }
            RequestError::Shutdown => f.write_str("the connection task has been shut down"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<scursor::ReadError> for RequestError {
    fn from(_: scursor::ReadError) -> Self {
        RequestError::Internal(InternalError::InsufficientBytesForRead)
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(_: scursor::WriteError) -> Self {
        RequestError::Internal(InternalError::InsufficientWriteSpace)
    }
}

/// Errors that occur while parsing a frame off a stream or datagram
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// The MBAP length field is too small to contain a function code
    MbapLengthTooSmall(usize),
    /// The MBAP length field exceeds the maximum allowed value
    MbapLengthTooBig(usize, usize),
    /// The MBAP protocol id is not zero
    UnknownProtocolId(u16),
    /// A frame exceeds the maximum allowed size
    FrameLengthTooBig(usize, usize),
    /// The function code does not map to a known frame shape
    UnknownFunctionCode(u8),
    /// The received CRC-16 does not match the computed one
    CrcValidationFailure(u16, u16),
    /// The received LRC does not match the computed one
    LrcValidationFailure(u8, u8),
    /// An ASCII frame contains an odd number of hex characters
    AsciiOddLength(usize),
    /// An ASCII frame contains a character that is not uppercase hex
    AsciiBadCharacter(u8),
    /// The response transaction id does not match the request
    TxIdMismatch(u16, u16),
    /// The response unit id does not match the request
    UnitIdMismatch(u8, u8),
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthTooSmall(size) => {
                write!(f, "received MBAP frame with length {size} too small to contain a PDU")
            }
            FrameParseError::MbapLengthTooBig(size, max) => {
                write!(f, "received MBAP frame with length {size} that exceeds the maximum of {max}")
            }
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received MBAP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::FrameLengthTooBig(size, max) => {
                write!(f, "frame length {size} exceeds the maximum of {max}")
            }
            FrameParseError::UnknownFunctionCode(code) => {
                write!(f, "cannot determine frame length for function code {code:#04X}")
            }
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received CRC {received:#06X} does not match the expected {expected:#06X}"
            ),
            FrameParseError::LrcValidationFailure(received, expected) => write!(
                f,
                "received LRC {received:#04X} does not match the expected {expected:#04X}"
            ),
            FrameParseError::AsciiOddLength(len) => {
                write!(f, "ASCII frame contains an odd number of hex characters: {len}")
            }
            FrameParseError::AsciiBadCharacter(byte) => {
                write!(f, "ASCII frame contains a non-hex character: {byte:#04X}")
            }
            FrameParseError::TxIdMismatch(received, expected) => write!(
                f,
                "response transaction id {received} does not match the request id {expected}"
            ),
            FrameParseError::UnitIdMismatch(received, expected) => write!(
                f,
                "response unit id {received} does not match the request id {expected}"
            ),
        }
    }
}

/// Errors that occur while validating a well-framed response PDU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// The response is too short to be valid
    InsufficientBytes,
    /// The declared byte count does not match the count implied by the request
    ByteCountMismatch(usize, usize),
    /// The declared byte count does not match the number of bytes present
    InsufficientBytesForByteCount(usize, usize),
    /// The response contains extra trailing bytes
    TrailingBytes(usize),
    /// A parameter expected to be echoed in the reply did not match the request
    ReplyEchoMismatch,
    /// The response function code matches neither the request nor its exception form
    UnknownResponseFunction(u8, u8, u8),
    /// A coil state field held a value other than 0xFF00 or 0x0000
    UnknownCoilState(u16),
    /// The MEI type in a device identification response is not 0x0E
    MeiTypeMismatch(u8),
    /// The FIFO count field exceeds the specification maximum of 31
    FifoCountTooLarge(u16),
    /// A file record sub-response declared an impossible length
    BadSubRecordLength(u8),
    /// The diagnostic sub-function echo did not match the request
    SubFunctionMismatch(u16, u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("response is too short to be valid"),
            AduParseError::ByteCountMismatch(expected, actual) => write!(
                f,
                "byte count {actual} does not match what is expected based on the request ({expected})"
            ),
            AduParseError::InsufficientBytesForByteCount(count, remaining) => write!(
                f,
                "byte count {count} does not match the number of bytes remaining ({remaining})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "response contains {remaining} extra trailing bytes")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}. Expected {expected} or {error}"
            ),
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
            AduParseError::MeiTypeMismatch(value) => {
                write!(f, "received device identification response with MEI type {value:#04X}")
            }
            AduParseError::FifoCountTooLarge(count) => {
                write!(f, "FIFO count {count} exceeds the maximum of 31")
            }
            AduParseError::BadSubRecordLength(len) => {
                write!(f, "file record sub-response declared impossible length {len}")
            }
            AduParseError::SubFunctionMismatch(received, expected) => write!(
                f,
                "diagnostic response echoed sub-function {received:#06X}, expected {expected:#06X}"
            ),
        }
    }
}

/// Errors that result from bad request parameters, detected before any I/O
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// The request contains a count of zero
    CountOfZero,
    /// The count exceeds the maximum allowed for this request type
    CountTooBigForType(u16, u16),
    /// `start + count` would overflow the 16-bit address space
    AddressOverflow(u16, u16),
    /// A file record carries a reference type other than 6
    BadReferenceType(u8),
    /// A file record number exceeds 9999
    BadRecordNumber(u16),
    /// The accumulated file record sub-requests exceed the allowed byte count
    FileRecordsTooBig(usize, usize),
    /// A file record declares a length that does not match its data
    RecordLengthMismatch(u16, usize),
    /// The request requires at least one item
    NoRecords,
}

impl std::error::Error for InvalidRequest {}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRequest::CountTooBigForType(count, max) => write!(
                f,
                "the requested count of {count} exceeds the maximum of {max} for this request type"
            ),
            InvalidRequest::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the address space"
            ),
            InvalidRequest::BadReferenceType(value) => {
                write!(f, "file record reference type must be 6, got {value}")
            }
            InvalidRequest::BadRecordNumber(value) => {
                write!(f, "file record number must be <= 9999, got {value}")
            }
            InvalidRequest::FileRecordsTooBig(size, max) => {
                write!(f, "file record sub-requests occupy {size} bytes, max is {max}")
            }
            InvalidRequest::RecordLengthMismatch(declared, actual) => write!(
                f,
                "file record declares {declared} registers but carries {actual}"
            ),
            InvalidRequest::NoRecords => f.write_str("at least one file record must be specified"),
        }
    }
}

/// Errors that indicate faulty logic in the library itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Attempted to read more bytes than present in a buffer
    InsufficientBytesForRead,
    /// Attempted to write beyond the end of a buffer
    InsufficientWriteSpace,
    /// A cursor seek exceeded the bounds of the underlying buffer
    BadSeekOperation,
    /// A computed ADU size exceeds what the specification allows
    AduTooBig(usize),
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientBytesForRead => {
                f.write_str("attempted to read more bytes than present")
            }
            InternalError::InsufficientWriteSpace => {
                f.write_str("insufficient space for write operation")
            }
            InternalError::BadSeekOperation => {
                f.write_str("cursor seek operation exceeded the bounds of the underlying buffer")
            }
            InternalError::AduTooBig(size) => {
                write!(f, "ADU length of {size} exceeds the maximum allowed length")
            }
        }
    }
}

/// Errors raised at construction time for impossible configurations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The slave id is outside 1..=247
    InvalidSlaveId(u8),
    /// ASCII framing requires the serial port to use 7 data bits
    AsciiRequiresSevenDataBits,
    /// The baud rate must be non-zero
    ZeroBaudRate,
}

impl std::error::Error for ConfigError {}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::InvalidSlaveId(id) => {
                write!(f, "slave id {id} is outside the addressable range 1..=247")
            }
            ConfigError::AsciiRequiresSevenDataBits => {
                f.write_str("ASCII framing requires the serial port to use 7 data bits")
            }
            ConfigError::ZeroBaudRate => f.write_str("baud rate must be non-zero"),
        }
    }
}

/// The graceful-stop deadline elapsed with connection tasks still running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownTimedOut;

impl std::error::Error for ShutdownTimedOut {}

impl std::fmt::Display for ShutdownTimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("server shutdown timed out with connection tasks still running")
    }
}
