use crate::common::buffer::ReadBuffer;
use crate::common::frame::{constants, Frame, FrameHeader};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

const START: u8 = b':';
const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Compute the LRC: the two's complement of the 8-bit sum of `unit_id`
/// followed by the PDU bytes
pub(crate) fn calc_lrc(unit_id: UnitId, pdu: &[u8]) -> u8 {
    let mut sum = unit_id.value;
    for byte in pdu {
        sum = sum.wrapping_add(*byte);
    }
    0u8.wrapping_sub(sum)
}

fn decode_nibble(byte: u8) -> Result<u8, FrameParseError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        _ => Err(FrameParseError::AsciiBadCharacter(byte)),
    }
}

#[derive(Clone, Copy)]
enum ParseState {
    /// Discarding bytes until the start marker
    Start,
    /// Accumulating hex characters until CR + LF
    Body,
}

pub(crate) struct AsciiParser {
    state: ParseState,
}

impl AsciiParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Start,
        }
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                // anything before the start marker is line noise
                while !cursor.is_empty() {
                    if cursor.read_u8()? == START {
                        self.state = ParseState::Body;
                        return self.parse(cursor, decode);
                    }
                }
                Ok(None)
            }
            ParseState::Body => {
                let mut terminator = None;
                for i in 0..cursor.len().saturating_sub(1) {
                    if cursor.peek_at(i)? == CR && cursor.peek_at(i + 1)? == LF {
                        terminator = Some(i);
                        break;
                    }
                }

                let length = match terminator {
                    Some(length) => length,
                    None => {
                        if cursor.len() >= constants::MAX_ASCII_FRAME_SIZE {
                            return Err(FrameParseError::FrameLengthTooBig(
                                cursor.len(),
                                constants::MAX_ASCII_FRAME_SIZE,
                            )
                            .into());
                        }
                        return Ok(None);
                    }
                };

                if length % 2 != 0 {
                    return Err(FrameParseError::AsciiOddLength(length).into());
                }

                let mut decoded = Vec::with_capacity(length / 2);
                {
                    let chars = cursor.read(length)?;
                    for pair in chars.chunks(2) {
                        decoded.push((decode_nibble(pair[0])? << 4) | decode_nibble(pair[1])?);
                    }
                }
                cursor.discard(2); // CR LF

                self.state = ParseState::Start;

                // unit id, function code and LRC at minimum
                if decoded.len() < 3 {
                    return Err(FrameParseError::AsciiOddLength(decoded.len()).into());
                }

                let unit_id = UnitId::new(decoded[0]);
                let pdu = &decoded[1..decoded.len() - 1];
                let received_lrc = decoded[decoded.len() - 1];

                let expected_lrc = calc_lrc(unit_id, pdu);
                if received_lrc != expected_lrc {
                    return Err(
                        FrameParseError::LrcValidationFailure(received_lrc, expected_lrc).into(),
                    );
                }

                if decode.enabled() {
                    tracing::info!(
                        "ASCII RX - {}",
                        AsciiDisplay::new(decode, unit_id, pdu, received_lrc)
                    );
                }

                let mut frame = Frame::new(FrameHeader::new_serial(unit_id));
                frame.set(pdu);
                Ok(Some(frame))
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
    }
}

pub(crate) struct AsciiFormatter {
    buffer: [u8; constants::MAX_ASCII_FRAME_SIZE],
}

impl AsciiFormatter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; constants::MAX_ASCII_FRAME_SIZE],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        pdu: &[u8],
        decode: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";

        if 1 + 2 * (2 + pdu.len()) + 2 > constants::MAX_ASCII_FRAME_SIZE {
            return Err(crate::error::InternalError::AduTooBig(pdu.len()).into());
        }

        let lrc = calc_lrc(header.unit_id, pdu);
        let mut pos = 0;

        self.buffer[pos] = START;
        pos += 1;
        for byte in std::iter::once(header.unit_id.value)
            .chain(pdu.iter().copied())
            .chain(std::iter::once(lrc))
        {
            self.buffer[pos] = HEX[(byte >> 4) as usize];
            self.buffer[pos + 1] = HEX[(byte & 0x0F) as usize];
            pos += 2;
        }
        self.buffer[pos] = CR;
        self.buffer[pos + 1] = LF;
        pos += 2;

        if decode.enabled() {
            tracing::info!(
                "ASCII TX - {}",
                AsciiDisplay::new(decode, header.unit_id, pdu, lrc)
            );
        }

        Ok(&self.buffer[..pos])
    }
}

struct AsciiDisplay<'a> {
    level: FrameDecodeLevel,
    address: UnitId,
    data: &'a [u8],
    lrc: u8,
}

impl<'a> AsciiDisplay<'a> {
    fn new(level: FrameDecodeLevel, address: UnitId, data: &'a [u8], lrc: u8) -> Self {
        AsciiDisplay {
            level,
            address,
            data,
            lrc,
        }
    }
}

impl std::fmt::Display for AsciiDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "address: {} lrc: {:#04X} (len = {})",
            self.address,
            self.lrc,
            self.data.len(),
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}
