use std::fmt::Write;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::decode::PhysDecodeLevel;

/// Encapsulates all possible physical layers as an enum
pub(crate) enum PhysLayerImpl {
    Tcp(tokio::net::TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>),
    #[cfg(feature = "tls")]
    TlsServer(Box<tokio_rustls::server::TlsStream<tokio::net::TcpStream>>),
    #[cfg(feature = "serial")]
    Serial(tokio_serial::SerialStream),
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

pub(crate) struct PhysLayer {
    layer: PhysLayerImpl,
    level: PhysDecodeLevel,
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.layer {
            PhysLayerImpl::Tcp(_) => f.write_str("Tcp"),
            #[cfg(feature = "tls")]
            PhysLayerImpl::Tls(_) => f.write_str("Tls"),
            #[cfg(feature = "tls")]
            PhysLayerImpl::TlsServer(_) => f.write_str("TlsServer"),
            #[cfg(feature = "serial")]
            PhysLayerImpl::Serial(_) => f.write_str("Serial"),
            #[cfg(test)]
            PhysLayerImpl::Mock(_) => f.write_str("Mock"),
        }
    }
}

impl PhysLayer {
    pub(crate) fn new_tcp(socket: tokio::net::TcpStream, level: PhysDecodeLevel) -> Self {
        Self {
            layer: PhysLayerImpl::Tcp(socket),
            level,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn new_tls(
        socket: tokio_rustls::client::TlsStream<tokio::net::TcpStream>,
        level: PhysDecodeLevel,
    ) -> Self {
        Self {
            layer: PhysLayerImpl::Tls(Box::new(socket)),
            level,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn new_tls_server(
        socket: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
        level: PhysDecodeLevel,
    ) -> Self {
        Self {
            layer: PhysLayerImpl::TlsServer(Box::new(socket)),
            level,
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn new_serial(stream: tokio_serial::SerialStream, level: PhysDecodeLevel) -> Self {
        Self {
            layer: PhysLayerImpl::Serial(stream),
            level,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mock(mock: tokio::io::DuplexStream, level: PhysDecodeLevel) -> Self {
        Self {
            layer: PhysLayerImpl::Mock(mock),
            level,
        }
    }

    pub(crate) async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, std::io::Error> {
        let length = match &mut self.layer {
            PhysLayerImpl::Tcp(x) => x.read(buffer).await?,
            #[cfg(feature = "tls")]
            PhysLayerImpl::Tls(x) => x.read(buffer).await?,
            #[cfg(feature = "tls")]
            PhysLayerImpl::TlsServer(x) => x.read(buffer).await?,
            #[cfg(feature = "serial")]
            PhysLayerImpl::Serial(x) => x.read(buffer).await?,
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.read(buffer).await?,
        };

        if self.level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(self.level, x))
            }
        }

        Ok(length)
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        if self.level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(self.level, data));
        }

        match &mut self.layer {
            PhysLayerImpl::Tcp(x) => x.write_all(data).await,
            #[cfg(feature = "tls")]
            PhysLayerImpl::Tls(x) => x.write_all(data).await,
            #[cfg(feature = "tls")]
            PhysLayerImpl::TlsServer(x) => x.write_all(data).await,
            #[cfg(feature = "serial")]
            PhysLayerImpl::Serial(x) => x.write_all(data).await,
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.write_all(data).await,
        }
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}
