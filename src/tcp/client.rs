use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::client::transport::Transport;
use crate::common::frame::{FrameHeader, FramedReader, FrameWriter, TxId};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::pdu::Pdu;
use crate::types::{TransportType, UnitId};

/// Options shared by the TCP-based transport drivers
#[derive(Clone, Copy, Debug)]
pub struct TcpOptions {
    /// Deadline bounding the write and the read of each exchange
    pub response_timeout: Duration,
    /// Deadline for establishing the connection
    pub connect_timeout: Duration,
    /// When set, a request after this much inactivity transparently
    /// reconnects first. `None` disables the check.
    pub idle_timeout: Option<Duration>,
    /// Protocol decoding for this connection
    pub decode: DecodeLevel,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            decode: DecodeLevel::nothing(),
        }
    }
}

struct Session {
    phys: PhysLayer,
    reader: FramedReader,
    writer: FrameWriter,
}

async fn dial(endpoint: &str, connect_timeout: Duration) -> Result<TcpStream, RequestError> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(RequestError::Io(std::io::ErrorKind::TimedOut)),
    }
}

/// MBAP over TCP, optionally wrapped in TLS.
///
/// The driver persists one connection, allocates transaction ids under the
/// exchange that uses them, and treats any correlation failure as a
/// desynchronized stream: the connection is closed rather than resynced.
pub struct TcpTransport {
    endpoint: String,
    options: TcpOptions,
    #[cfg(feature = "tls")]
    tls: Option<crate::tcp::tls::TlsClientConfig>,
    session: Option<Session>,
    tx_id: TxId,
    last_activity: Instant,
}

impl TcpTransport {
    /// Create a plain TCP driver for `endpoint` (a `host:port` string)
    pub fn new(endpoint: &str, options: TcpOptions) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            options,
            #[cfg(feature = "tls")]
            tls: None,
            session: None,
            tx_id: TxId::default(),
            last_activity: Instant::now(),
        }
    }

    /// Create a driver that wraps the TCP stream in TLS after connecting
    #[cfg(feature = "tls")]
    pub fn with_tls(
        endpoint: &str,
        options: TcpOptions,
        tls: crate::tcp::tls::TlsClientConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            options,
            tls: Some(tls),
            session: None,
            tx_id: TxId::default(),
            last_activity: Instant::now(),
        }
    }

    fn drop_session(&mut self) {
        self.session = None;
    }

    async fn reconnect_if_idle(&mut self) -> Result<(), RequestError> {
        let idle_timeout = match self.options.idle_timeout {
            Some(timeout) => timeout,
            None => return Ok(()),
        };

        if self.session.is_some() && self.last_activity.elapsed() > idle_timeout {
            tracing::debug!("reconnecting after {:?} of inactivity", idle_timeout);
            self.drop_session();
            self.connect().await?;
        }
        Ok(())
    }

    async fn exchange(&mut self, unit_id: UnitId, request: &Pdu) -> Result<Pdu, RequestError> {
        self.reconnect_if_idle().await?;

        let tx_id = self.tx_id.next();
        let header = FrameHeader::new_mbap(unit_id, tx_id);
        let timeout = self.options.response_timeout;
        let decode = self.options.decode;

        let session = self.session.as_mut().ok_or(RequestError::NoConnection)?;

        let result = Self::exchange_on(session, header, request, timeout, decode).await;
        match result {
            Ok(pdu) => {
                self.last_activity = Instant::now();
                Ok(pdu)
            }
            Err(RequestError::ResponseTimeout) => Err(RequestError::ResponseTimeout),
            Err(err) => {
                // write failures and correlation failures leave the stream
                // in an unknown state
                self.drop_session();
                Err(err)
            }
        }
    }

    async fn exchange_on(
        session: &mut Session,
        header: FrameHeader,
        request: &Pdu,
        timeout: Duration,
        decode: DecodeLevel,
    ) -> Result<Pdu, RequestError> {
        let bytes = session.writer.format(header, request, decode.frame)?;
        write_with_timeout(&mut session.phys, bytes, timeout).await?;

        let frame = match tokio::time::timeout(
            timeout,
            session.reader.next_frame(&mut session.phys, decode.frame),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(RequestError::ResponseTimeout),
        };

        let expected = header.tx_id.unwrap_or_default().to_u16();
        let received = frame.header.tx_id.unwrap_or_default().to_u16();
        if received != expected {
            return Err(FrameParseError::TxIdMismatch(received, expected).into());
        }
        if frame.header.unit_id != header.unit_id {
            return Err(FrameParseError::UnitIdMismatch(
                frame.header.unit_id.value,
                header.unit_id.value,
            )
            .into());
        }

        Ok(Pdu::from_slice(frame.payload())?)
    }
}

pub(crate) async fn write_with_timeout(
    phys: &mut PhysLayer,
    bytes: &[u8],
    timeout: Duration,
) -> Result<(), RequestError> {
    match tokio::time::timeout(timeout, phys.write(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(RequestError::ResponseTimeout),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), RequestError> {
        if self.session.is_some() {
            return Ok(());
        }

        let stream = dial(&self.endpoint, self.options.connect_timeout).await?;

        #[cfg(feature = "tls")]
        let phys = match &self.tls {
            Some(tls) => {
                let stream = match tokio::time::timeout(
                    self.options.connect_timeout,
                    tls.handshake(stream),
                )
                .await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(err)) => return Err(err.into()),
                    Err(_) => return Err(RequestError::Io(std::io::ErrorKind::TimedOut)),
                };
                PhysLayer::new_tls(stream, self.options.decode.physical)
            }
            None => PhysLayer::new_tcp(stream, self.options.decode.physical),
        };
        #[cfg(not(feature = "tls"))]
        let phys = PhysLayer::new_tcp(stream, self.options.decode.physical);

        self.session = Some(Session {
            phys,
            reader: FramedReader::mbap(),
            writer: FrameWriter::mbap(),
        });
        self.last_activity = Instant::now();
        tracing::info!("connected to {}", self.endpoint);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RequestError> {
        self.drop_session();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn send_request(&mut self, unit_id: UnitId, request: &Pdu) -> Result<Pdu, RequestError> {
        self.exchange(unit_id, request).await
    }

    async fn send_broadcast(&mut self, request: &Pdu) -> Result<(), RequestError> {
        self.reconnect_if_idle().await?;

        let tx_id = self.tx_id.next();
        let header = FrameHeader::new_mbap(UnitId::broadcast(), tx_id);
        let timeout = self.options.response_timeout;
        let decode = self.options.decode;

        let session = self.session.as_mut().ok_or(RequestError::NoConnection)?;
        let bytes = session.writer.format(header, request, decode.frame)?;
        write_with_timeout(&mut session.phys, bytes, timeout).await?;

        // no response is expected; whatever the speculative read produces,
        // a response from a confused device or the usual timeout, is ignored
        match tokio::time::timeout(
            timeout,
            session.reader.next_frame(&mut session.phys, decode.frame),
        )
        .await
        {
            Ok(Ok(_)) => {
                tracing::warn!("discarding response to broadcast request");
            }
            Ok(Err(err)) => {
                tracing::warn!("ignoring malformed frame after broadcast: {}", err);
                session.reader.reset();
            }
            Err(_) => {}
        }

        self.last_activity = Instant::now();
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.options.response_timeout = timeout;
    }

    fn transport_type(&self) -> TransportType {
        #[cfg(feature = "tls")]
        if self.tls.is_some() {
            return TransportType::Tls;
        }
        TransportType::Tcp
    }
}

/// RTU framing over a TCP stream, as spoken by serial-to-Ethernet gateways.
///
/// There is no transaction id: correlation relies on one request at a time
/// per connection, which the client guarantees by serializing exchanges.
pub struct RtuOverTcpTransport {
    endpoint: String,
    options: TcpOptions,
    session: Option<Session>,
    last_activity: Instant,
}

impl RtuOverTcpTransport {
    /// Create an RTU-over-TCP driver for `endpoint` (a `host:port` string)
    pub fn new(endpoint: &str, options: TcpOptions) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            options,
            session: None,
            last_activity: Instant::now(),
        }
    }

    fn drop_session(&mut self) {
        self.session = None;
    }
}

#[async_trait]
impl Transport for RtuOverTcpTransport {
    async fn connect(&mut self) -> Result<(), RequestError> {
        if self.session.is_some() {
            return Ok(());
        }

        let stream = dial(&self.endpoint, self.options.connect_timeout).await?;
        self.session = Some(Session {
            phys: PhysLayer::new_tcp(stream, self.options.decode.physical),
            reader: FramedReader::rtu_response(),
            writer: FrameWriter::rtu(),
        });
        self.last_activity = Instant::now();
        tracing::info!("connected to {} (rtu framing)", self.endpoint);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RequestError> {
        self.drop_session();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn send_request(&mut self, unit_id: UnitId, request: &Pdu) -> Result<Pdu, RequestError> {
        let timeout = self.options.response_timeout;
        let decode = self.options.decode;
        let session = self.session.as_mut().ok_or(RequestError::NoConnection)?;

        let result: Result<Pdu, RequestError> = async {
            let header = FrameHeader::new_serial(unit_id);
            let bytes = session.writer.format(header, request, decode.frame)?;
            write_with_timeout(&mut session.phys, bytes, timeout).await?;

            let frame = match tokio::time::timeout(
                timeout,
                session.reader.next_frame(&mut session.phys, decode.frame),
            )
            .await
            {
                Ok(Ok(frame)) => frame,
                Ok(Err(err)) => return Err(err),
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
        .await;

        match result {
            Ok(pdu) => {
                self.last_activity = Instant::now();
                Ok(pdu)
            }
            Err(RequestError::ResponseTimeout) => Err(RequestError::ResponseTimeout),
            Err(err) => {
                self.drop_session();
                Err(err)
            }
        }
    }

    async fn send_broadcast(&mut self, request: &Pdu) -> Result<(), RequestError> {
        let timeout = self.options.response_timeout;
        let decode = self.options.decode;
        let session = self.session.as_mut().ok_or(RequestError::NoConnection)?;

        // no response envelope exists for broadcasts on this framing, so the
        // driver returns as soon as the frame is written
        let header = FrameHeader::new_serial(UnitId::broadcast());
        let bytes = session.writer.format(header, request, decode.frame)?;
        write_with_timeout(&mut session.phys, bytes, timeout).await
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.options.response_timeout = timeout;
    }

    fn transport_type(&self) -> TransportType {
        TransportType::RtuOverTcp
    }
}
