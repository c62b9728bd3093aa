use crate::common::buffer::ReadBuffer;
use crate::common::phys::PhysLayer;
use crate::decode::FrameDecodeLevel;
use crate::error::RequestError;
use crate::pdu::Pdu;
use crate::serial::ascii::{AsciiFormatter, AsciiParser};
use crate::serial::frame::{RtuFormatter, RtuParser};
use crate::tcp::frame::{MbapFormatter, MbapParser};
use crate::types::UnitId;

pub(crate) mod constants {
    /// Maximum size of a PDU (function code + payload)
    pub(crate) const MAX_PDU_SIZE: usize = 253;
    /// Maximum size of an MBAP frame: 7-byte header + PDU
    pub(crate) const MAX_MBAP_FRAME_SIZE: usize = 7 + MAX_PDU_SIZE;
    /// Maximum size of an RTU frame: unit id + PDU + CRC
    pub(crate) const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;
    /// Maximum size of an ASCII frame: ':' + 2 chars per {unit, pdu, lrc} byte + CR + LF
    pub(crate) const MAX_ASCII_FRAME_SIZE: usize = 1 + 2 * (1 + MAX_PDU_SIZE + 1) + 2;
}

/// MBAP transaction identifier. Zero is reserved as the "uninitialized"
/// sentinel, so allocation starts at 1 and wrapping skips 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    pub(crate) fn next(&mut self) -> TxId {
        let ret = self.value;
        self.value = if self.value == u16::MAX {
            1
        } else {
            self.value + 1
        };
        TxId::new(ret)
    }
}

impl Default for TxId {
    fn default() -> Self {
        TxId::new(1)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

/// Transport-level addressing of a single frame
#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    /// Present on MBAP framings only
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_mbap(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: Some(tx_id),
        }
    }

    pub(crate) fn new_serial(unit_id: UnitId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: None,
        }
    }
}

/// A de-framed ADU: transport header fields plus the raw PDU bytes
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; constants::MAX_PDU_SIZE],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; constants::MAX_PDU_SIZE],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        if src.len() > self.pdu.len() {
            return false;
        }
        self.pdu[..src.len()].copy_from_slice(src);
        self.length = src.len();
        true
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[..self.length]
    }
}

/// The three framings a reader can speak
pub(crate) enum FrameParser {
    Mbap(MbapParser),
    Rtu(RtuParser),
    Ascii(AsciiParser),
}

impl FrameParser {
    fn max_frame_size(&self) -> usize {
        match self {
            FrameParser::Mbap(_) => constants::MAX_MBAP_FRAME_SIZE,
            FrameParser::Rtu(_) => constants::MAX_RTU_FRAME_SIZE,
            FrameParser::Ascii(_) => constants::MAX_ASCII_FRAME_SIZE,
        }
    }

    fn parse(
        &mut self,
        buffer: &mut ReadBuffer,
        decode: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self {
            FrameParser::Mbap(parser) => parser.parse(buffer, decode),
            FrameParser::Rtu(parser) => parser.parse(buffer, decode),
            FrameParser::Ascii(parser) => parser.parse(buffer, decode),
        }
    }

    fn reset(&mut self) {
        match self {
            FrameParser::Mbap(parser) => parser.reset(),
            FrameParser::Rtu(parser) => parser.reset(),
            FrameParser::Ascii(parser) => parser.reset(),
        }
    }
}

/// Reads complete frames off a physical layer, accumulating partial data as
/// needed. Advancing past a frame always implies its bytes are consumed.
pub(crate) struct FramedReader {
    parser: FrameParser,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn mbap() -> Self {
        Self::new(FrameParser::Mbap(MbapParser::new()))
    }

    pub(crate) fn rtu_request() -> Self {
        Self::new(FrameParser::Rtu(RtuParser::new_request_parser()))
    }

    pub(crate) fn rtu_response() -> Self {
        Self::new(FrameParser::Rtu(RtuParser::new_response_parser()))
    }

    pub(crate) fn ascii() -> Self {
        Self::new(FrameParser::Ascii(AsciiParser::new()))
    }

    fn new(parser: FrameParser) -> Self {
        let size = parser.max_frame_size();
        Self {
            parser,
            buffer: ReadBuffer::new(size),
        }
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        decode: FrameDecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            match self.parser.parse(&mut self.buffer, decode) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {
                    self.buffer.read_some(io).await?;
                }
                Err(err) => {
                    self.parser.reset();
                    return Err(err);
                }
            }
        }
    }

    /// Drop any accumulated bytes and return the parser to its start state.
    /// Used after an exchange fails so the next one starts clean.
    pub(crate) fn reset(&mut self) {
        self.parser.reset();
        let size = self.parser.max_frame_size();
        self.buffer = ReadBuffer::new(size);
    }
}

/// Formats outgoing frames into an internal buffer
pub(crate) enum FrameWriter {
    Mbap(MbapFormatter),
    Rtu(RtuFormatter),
    Ascii(AsciiFormatter),
}

impl FrameWriter {
    pub(crate) fn mbap() -> Self {
        FrameWriter::Mbap(MbapFormatter::new())
    }

    pub(crate) fn rtu() -> Self {
        FrameWriter::Rtu(RtuFormatter::new())
    }

    pub(crate) fn ascii() -> Self {
        FrameWriter::Ascii(AsciiFormatter::new())
    }

    /// Frame `pdu` for the destination described by `header`, returning the
    /// wire bytes valid until the next call
    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        pdu: &Pdu,
        decode: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        match self {
            FrameWriter::Mbap(formatter) => formatter.format(header, pdu.as_slice(), decode),
            FrameWriter::Rtu(formatter) => formatter.format(header, pdu.as_slice(), decode),
            FrameWriter::Ascii(formatter) => formatter.format(header, pdu.as_slice(), decode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_id_starts_at_one_and_skips_zero_on_wrap() {
        let mut tx_id = TxId::default();
        assert_eq!(tx_id.next().to_u16(), 1);
        assert_eq!(tx_id.next().to_u16(), 2);

        let mut tx_id = TxId::new(u16::MAX);
        assert_eq!(tx_id.next().to_u16(), u16::MAX);
        assert_eq!(tx_id.next().to_u16(), 1);
    }

    #[test]
    fn frame_rejects_oversized_payload() {
        let mut frame = Frame::new(FrameHeader::new_serial(UnitId::new(1)));
        assert!(frame.set(&[0; constants::MAX_PDU_SIZE]));
        assert!(!frame.set(&[0; constants::MAX_PDU_SIZE + 1]));
    }
}
