use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Client-side TLS configuration.
///
/// Certificate and key material is prepared by the caller as a
/// `rustls::ClientConfig` (an optional client certificate goes in there);
/// this type only pairs it with the name to verify on the peer certificate.
/// rustls negotiates TLS 1.2 at minimum.
#[derive(Clone)]
pub struct TlsClientConfig {
    config: Arc<rustls::ClientConfig>,
    server_name: rustls::ServerName,
}

impl TlsClientConfig {
    /// Pair a prepared rustls configuration with the expected server name
    pub fn new(config: Arc<rustls::ClientConfig>, server_name: rustls::ServerName) -> Self {
        Self {
            config,
            server_name,
        }
    }

    pub(crate) async fn handshake(
        &self,
        stream: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, std::io::Error> {
        let connector = TlsConnector::from(self.config.clone());
        connector.connect(self.server_name.clone(), stream).await
    }
}

impl std::fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("TlsClientConfig")
    }
}

/// Server-side TLS configuration wrapping a prepared `rustls::ServerConfig`
#[derive(Clone)]
pub struct TlsServerConfig {
    config: Arc<rustls::ServerConfig>,
}

impl TlsServerConfig {
    /// Wrap a prepared rustls server configuration
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self { config }
    }

    pub(crate) async fn accept(
        &self,
        stream: TcpStream,
    ) -> Result<tokio_rustls::server::TlsStream<TcpStream>, std::io::Error> {
        let acceptor = TlsAcceptor::from(self.config.clone());
        acceptor.accept(stream).await
    }
}

impl std::fmt::Debug for TlsServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("TlsServerConfig")
    }
}
