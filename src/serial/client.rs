use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::client::transport::Transport;
use crate::common::frame::{constants, FrameHeader, FramedReader, FrameWriter};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{AduParseError, ConfigError, FrameParseError, RequestError};
use crate::pdu::Pdu;
use crate::serial::frame::calc_crc;
use crate::serial::SerialSettings;
use crate::tcp::client::write_with_timeout;
use crate::types::{TransportType, UnitId};

/// Options for the serial transport driver
#[derive(Clone, Copy, Debug)]
pub struct SerialOptions {
    /// Deadline bounding each request/response exchange
    pub response_timeout: Duration,
    /// Protocol decoding for this driver
    pub decode: DecodeLevel,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            decode: DecodeLevel::nothing(),
        }
    }
}

enum Framing {
    Rtu,
    Ascii(Box<FramedReader>),
}

/// RTU or ASCII framing over a serial line.
///
/// RTU frame boundaries are detected by timing: silence longer than 3.5
/// character times ends a frame, and each read is bounded by roughly 1.5
/// character times so the gap is observed promptly. ASCII frames carry
/// explicit start and end markers instead, so reads run until CR + LF.
pub struct SerialTransport {
    path: String,
    settings: SerialSettings,
    options: SerialOptions,
    framing: Framing,
    writer: FrameWriter,
    port: Option<PhysLayer>,
}

impl SerialTransport {
    /// Create an RTU driver for the port at `path`
    pub fn rtu(
        path: &str,
        settings: SerialSettings,
        options: SerialOptions,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            path: path.to_string(),
            settings,
            options,
            framing: Framing::Rtu,
            writer: FrameWriter::rtu(),
            port: None,
        })
    }

    /// Create an ASCII driver for the port at `path`. The settings must use
    /// 7 data bits.
    pub fn ascii(
        path: &str,
        settings: SerialSettings,
        options: SerialOptions,
    ) -> Result<Self, ConfigError> {
        settings.validate_ascii()?;
        Ok(Self {
            path: path.to_string(),
            settings,
            options,
            framing: Framing::Ascii(Box::new(FramedReader::ascii())),
            writer: FrameWriter::ascii(),
            port: None,
        })
    }

    /// Accumulate one RTU frame using inter-character silence detection.
    ///
    /// Bytes may arrive from the OS in arbitrary chunks, so the only reliable
    /// end-of-frame signal is the 3.5-character gap, tracked as cumulative
    /// idle time since the last byte.
    async fn read_rtu_frame(
        port: &mut PhysLayer,
        settings: &SerialSettings,
        deadline: Instant,
    ) -> Result<Vec<u8>, RequestError> {
        let inter_char = settings.inter_char_timeout();
        let inter_frame = settings.inter_frame_delay();

        let mut data: Vec<u8> = Vec::with_capacity(constants::MAX_RTU_FRAME_SIZE);
        let mut scratch = [0u8; constants::MAX_RTU_FRAME_SIZE];
        let mut idle = Duration::ZERO;

        loop {
            match tokio::time::timeout(inter_char, port.read(&mut scratch)).await {
                Ok(Ok(0)) => {
                    return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
                }
                Ok(Ok(count)) => {
                    data.extend_from_slice(&scratch[..count]);
                    idle = Duration::ZERO;
                    if data.len() >= constants::MAX_RTU_FRAME_SIZE {
                        return Ok(data);
                    }
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    if !data.is_empty() {
                        idle += inter_char;
                        if idle >= inter_frame {
                            return Ok(data);
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                if data.is_empty() {
                    return Err(RequestError::ResponseTimeout);
                }
                return Ok(data);
            }
        }
    }

    fn parse_rtu_frame(data: &[u8], expected: UnitId) -> Result<Pdu, RequestError> {
        // unit id, function code and CRC at minimum
        if data.len() < 4 {
            return Err(AduParseError::InsufficientBytes.into());
        }

        let unit_id = UnitId::new(data[0]);
        let pdu = &data[1..data.len() - 2];
        let received_crc =
            (data[data.len() - 2] as u16) | ((data[data.len() - 1] as u16) << 8);

        let expected_crc = calc_crc(unit_id, pdu);
        if received_crc != expected_crc {
            return Err(FrameParseError::CrcValidationFailure(received_crc, expected_crc).into());
        }
        if unit_id != expected {
            return Err(FrameParseError::UnitIdMismatch(unit_id.value, expected.value).into());
        }

        Ok(Pdu::from_slice(pdu)?)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<(), RequestError> {
        if self.port.is_some() {
            return Ok(());
        }

        let stream = crate::serial::open(&self.path, self.settings)?;
        self.port = Some(PhysLayer::new_serial(
            stream,
            self.options.decode.physical,
        ));
        tracing::info!("opened serial port {}", self.path);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RequestError> {
        self.port = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn send_request(&mut self, unit_id: UnitId, request: &Pdu) -> Result<Pdu, RequestError> {
        let timeout = self.options.response_timeout;
        let decode = self.options.decode;
        let settings = self.settings;
        let port = self.port.as_mut().ok_or(RequestError::NoConnection)?;

        let header = FrameHeader::new_serial(unit_id);
        let bytes = self.writer.format(header, request, decode.frame)?;
        write_with_timeout(port, bytes, timeout).await?;

        match &mut self.framing {
            Framing::Rtu => {
                let deadline = Instant::now() + timeout;
                let data = Self::read_rtu_frame(port, &settings, deadline).await?;
                Self::parse_rtu_frame(&data, unit_id)
            }
            Framing::Ascii(reader) => {
                let frame =
                    match tokio::time::timeout(timeout, reader.next_frame(port, decode.frame))
                        .await
                    {
                        Ok(Ok(frame)) => frame,
                        Ok(Err(err)) => {
                            reader.reset();
                            return Err(err);
                        }
                        Err(_) => return Err(RequestError::ResponseTimeout),
                    };

                if frame.header.unit_id != unit_id {
                    return Err(FrameParseError::UnitIdMismatch(
                        frame.header.unit_id.value,
                        unit_id.value,
                    )
                    .into());
                }

                Ok(Pdu::from_slice(frame.payload())?)
            }
        }
    }

    async fn send_broadcast(&mut self, request: &Pdu) -> Result<(), RequestError> {
        let timeout = self.options.response_timeout;
        let decode = self.options.decode;
        let port = self.port.as_mut().ok_or(RequestError::NoConnection)?;

        // serial broadcasts produce no response at all, the write is the
        // whole exchange
        let header = FrameHeader::new_serial(UnitId::broadcast());
        let bytes = self.writer.format(header, request, decode.frame)?;
        write_with_timeout(port, bytes, timeout).await
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.options.response_timeout = timeout;
    }

    fn transport_type(&self) -> TransportType {
        match self.framing {
            Framing::Rtu => TransportType::Rtu,
            Framing::Ascii(_) => TransportType::Ascii,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_accumulated_rtu_frame() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let pdu = SerialTransport::parse_rtu_frame(&data, UnitId::new(1)).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn rejects_wrong_slave_address() {
        let pdu = [0x03u8, 0x02, 0x00, 0x01];
        let crc = calc_crc(UnitId::new(2), &pdu);
        let mut data = vec![0x02];
        data.extend_from_slice(&pdu);
        data.push(crc as u8);
        data.push((crc >> 8) as u8);

        assert_eq!(
            SerialTransport::parse_rtu_frame(&data, UnitId::new(1)).unwrap_err(),
            RequestError::BadFrame(FrameParseError::UnitIdMismatch(2, 1))
        );
    }

    #[test]
    fn rejects_corrupt_crc() {
        let mut data = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        data[2] ^= 0x80;
        assert!(matches!(
            SerialTransport::parse_rtu_frame(&data, UnitId::new(1)).unwrap_err(),
            RequestError::BadFrame(FrameParseError::CrcValidationFailure(_, _))
        ));
    }

    #[test]
    fn rejects_truncated_frame() {
        assert_eq!(
            SerialTransport::parse_rtu_frame(&[0x01, 0x03, 0x84], UnitId::new(1)).unwrap_err(),
            RequestError::BadResponse(AduParseError::InsufficientBytes)
        );
    }
}
