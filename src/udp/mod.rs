use std::time::Duration;

use async_trait::async_trait;
use scursor::ReadCursor;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::client::transport::Transport;
use crate::common::frame::{constants, FrameHeader, FrameWriter, TxId};
use crate::decode::DecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::pdu::Pdu;
use crate::tcp::frame::{MAX_LENGTH_FIELD, MIN_LENGTH_FIELD};
use crate::types::{TransportType, UnitId};

/// Options for the UDP transport driver
#[derive(Clone, Copy, Debug)]
pub struct UdpOptions {
    /// Deadline bounding each request/response exchange
    pub response_timeout: Duration,
    /// Protocol decoding for this driver
    pub decode: DecodeLevel,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            decode: DecodeLevel::nothing(),
        }
    }
}

/// MBAP over UDP datagrams.
///
/// UDP is connectionless: "connecting" resolves the peer and binds a local
/// socket. One datagram carries one request, one datagram one response. No
/// retransmission happens at this layer; a datagram with a foreign
/// transaction id is dropped and reading continues until the deadline.
pub struct UdpTransport {
    endpoint: String,
    options: UdpOptions,
    socket: Option<UdpSocket>,
    tx_id: TxId,
    writer: FrameWriter,
}

impl UdpTransport {
    /// Create a UDP driver for `endpoint` (a `host:port` string)
    pub fn new(endpoint: &str, options: UdpOptions) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            options,
            socket: None,
            tx_id: TxId::default(),
            writer: FrameWriter::mbap(),
        }
    }

    /// Parse one datagram. `Ok(None)` means the datagram belongs to another
    /// transaction and should be ignored.
    fn parse_datagram(
        datagram: &[u8],
        expected_tx: u16,
        expected_unit: UnitId,
    ) -> Result<Option<Pdu>, RequestError> {
        let mut cursor = ReadCursor::new(datagram);
        let tx_id = cursor.read_u16_be()?;
        let protocol_id = cursor.read_u16_be()?;
        let len_field = cursor.read_u16_be()? as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }
        if len_field < MIN_LENGTH_FIELD {
            return Err(FrameParseError::MbapLengthTooSmall(len_field).into());
        }
        if len_field > MAX_LENGTH_FIELD {
            return Err(FrameParseError::MbapLengthTooBig(len_field, MAX_LENGTH_FIELD).into());
        }
        if cursor.remaining() != len_field - 1 {
            return Err(FrameParseError::MbapLengthTooBig(len_field, cursor.remaining() + 1).into());
        }

        if tx_id != expected_tx {
            tracing::warn!(
                "dropping datagram with transaction id {} while waiting for {}",
                tx_id,
                expected_tx
            );
            return Ok(None);
        }
        if unit_id != expected_unit {
            return Err(
                FrameParseError::UnitIdMismatch(unit_id.value, expected_unit.value).into(),
            );
        }

        let pdu = cursor.read_bytes(len_field - 1)?;
        Ok(Some(Pdu::from_slice(pdu)?))
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&mut self) -> Result<(), RequestError> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.endpoint).await?;
        self.socket = Some(socket);
        tracing::info!("udp peer resolved: {}", self.endpoint);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RequestError> {
        self.socket = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn send_request(&mut self, unit_id: UnitId, request: &Pdu) -> Result<Pdu, RequestError> {
        let socket = self.socket.as_ref().ok_or(RequestError::NoConnection)?;

        let tx_id = self.tx_id.next();
        let header = FrameHeader::new_mbap(unit_id, tx_id);
        let bytes = self
            .writer
            .format(header, request, self.options.decode.frame)?;
        socket.send(bytes).await?;

        let deadline = Instant::now() + self.options.response_timeout;
        let mut datagram = [0u8; constants::MAX_MBAP_FRAME_SIZE];
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(RequestError::ResponseTimeout)?;

            let count = match tokio::time::timeout(remaining, socket.recv(&mut datagram)).await {
                Ok(Ok(count)) => count,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(RequestError::ResponseTimeout),
            };

            if let Some(pdu) =
                Self::parse_datagram(&datagram[..count], tx_id.to_u16(), unit_id)?
            {
                return Ok(pdu);
            }
        }
    }

    async fn send_broadcast(&mut self, request: &Pdu) -> Result<(), RequestError> {
        let socket = self.socket.as_ref().ok_or(RequestError::NoConnection)?;

        let tx_id = self.tx_id.next();
        let header = FrameHeader::new_mbap(UnitId::broadcast(), tx_id);
        let bytes = self
            .writer
            .format(header, request, self.options.decode.frame)?;
        socket.send(bytes).await?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.options.response_timeout = timeout;
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Udp
    }
}
