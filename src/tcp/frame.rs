use scursor::WriteCursor;

use crate::common::buffer::ReadBuffer;
use crate::common::frame::{constants, Frame, FrameHeader, TxId};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) const HEADER_LENGTH: usize = 7;
/// The length field counts the unit id plus the PDU
pub(crate) const MAX_LENGTH_FIELD: usize = constants::MAX_PDU_SIZE + 1;
/// At minimum the length field must cover the unit id and a function code
pub(crate) const MIN_LENGTH_FIELD: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MbapHeader {
    pub(crate) tx_id: TxId,
    pub(crate) len_field: u16,
    pub(crate) unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    // parsed header and the remaining PDU length
    Header(MbapHeader, usize),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<(MbapHeader, usize), RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let len_field = cursor.read_u16_be()?;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        let length = len_field as usize;
        if length < MIN_LENGTH_FIELD {
            return Err(FrameParseError::MbapLengthTooSmall(length).into());
        }
        if length > MAX_LENGTH_FIELD {
            return Err(FrameParseError::MbapLengthTooBig(length, MAX_LENGTH_FIELD).into());
        }

        // the unit id counts towards the length field
        let pdu_length = length - 1;

        Ok((
            MbapHeader {
                tx_id,
                len_field,
                unit_id,
            },
            pdu_length,
        ))
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header, pdu_length) => {
                if cursor.len() < pdu_length {
                    return Ok(None);
                }

                let mut frame = Frame::new(FrameHeader::new_mbap(header.unit_id, header.tx_id));
                frame.set(cursor.read(pdu_length)?);
                self.state = ParseState::Begin;

                if decode.enabled() {
                    tracing::info!(
                        "MBAP RX - {}",
                        MbapDisplay::new(decode, header, frame.payload())
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < HEADER_LENGTH {
                    return Ok(None);
                }

                let (header, pdu_length) = Self::parse_header(cursor)?;
                self.state = ParseState::Header(header, pdu_length);
                self.parse(cursor, decode)
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Begin;
    }
}

pub(crate) struct MbapFormatter {
    buffer: [u8; constants::MAX_MBAP_FRAME_SIZE],
}

impl MbapFormatter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; constants::MAX_MBAP_FRAME_SIZE],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        pdu: &[u8],
        decode: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        // MBAP framing is always configured with a transaction id
        let tx_id = header.tx_id.unwrap_or_default();
        let len_field = (pdu.len() + 1) as u16;

        let end = {
            let mut cursor = WriteCursor::new(self.buffer.as_mut());
            cursor.write_u16_be(tx_id.to_u16())?;
            cursor.write_u16_be(0)?; // protocol id
            cursor.write_u16_be(len_field)?;
            cursor.write_u8(header.unit_id.value)?;
            for byte in pdu {
                cursor.write_u8(*byte)?;
            }
            cursor.position()
        };

        if decode.enabled() {
            tracing::info!(
                "MBAP TX - {}",
                MbapDisplay::new(
                    decode,
                    MbapHeader {
                        tx_id,
                        len_field,
                        unit_id: header.unit_id
                    },
                    pdu
                )
            );
        }

        Ok(&self.buffer[..end])
    }
}

pub(crate) struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: MbapHeader,
    bytes: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, header: MbapHeader, bytes: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            bytes,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id, self.header.unit_id, self.header.len_field
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.bytes)?;
        }
        Ok(())
    }
}
