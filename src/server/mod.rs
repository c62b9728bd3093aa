pub(crate) mod task;

mod handler;
mod memory;

pub use handler::DataStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::common::frame::{FramedReader, FrameWriter};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::ShutdownTimedOut;
use crate::types::DeviceIdentification;

use task::SessionTask;

#[cfg(feature = "tls")]
type MaybeTls = Option<crate::tcp::tls::TlsServerConfig>;
#[cfg(not(feature = "tls"))]
type MaybeTls = Option<std::convert::Infallible>;

const DEFAULT_MAX_SESSIONS: usize = 64;

/// Tracks live sessions so that shutdown can signal each of them, and so the
/// oldest session is evicted once the configured maximum is reached
struct SessionTracker {
    max: usize,
    id: u64,
    sessions: BTreeMap<u64, mpsc::Sender<()>>,
}

type SharedTracker = Arc<Mutex<SessionTracker>>;

impl SessionTracker {
    fn wrapped(max: usize) -> SharedTracker {
        Arc::new(Mutex::new(Self {
            max,
            id: 0,
            sessions: BTreeMap::new(),
        }))
    }

    fn add(&mut self, sender: mpsc::Sender<()>) -> u64 {
        if !self.sessions.is_empty() && self.sessions.len() >= self.max {
            if let Some(id) = self.sessions.keys().next().copied() {
                tracing::warn!("exceeded max connections, closing oldest session: {}", id);
                // dropping the sender closes the session's shutdown channel
                self.sessions.remove(&id);
            }
        }

        let id = self.id;
        self.id += 1;
        self.sessions.insert(id, sender);
        id
    }

    fn remove(&mut self, id: u64) {
        self.sessions.remove(&id);
    }

    fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// A Modbus server: a data store, a device identification record, and the
/// connection settings shared by every listener spawned from it.
///
/// Each accepted connection runs on its own task; requests on distinct
/// connections execute concurrently and meet only inside the data store.
pub struct Server<S: DataStore> {
    store: Arc<S>,
    device: Arc<DeviceIdentification>,
    max_sessions: usize,
    decode: DecodeLevel,
}

impl<S: DataStore> Server<S> {
    /// Create a server around `store` with default settings
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            device: Arc::new(DeviceIdentification::default()),
            max_sessions: DEFAULT_MAX_SESSIONS,
            decode: DecodeLevel::nothing(),
        }
    }

    /// Replace the device identification served for function code 43
    pub fn device_identification(mut self, device: DeviceIdentification) -> Self {
        self.device = Arc::new(device);
        self
    }

    /// Bound the number of concurrent connections; the oldest connection is
    /// closed when a new one would exceed the bound
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    /// Set the protocol decode level for spawned listeners
    pub fn decode_level(mut self, decode: DecodeLevel) -> Self {
        self.decode = decode;
        self
    }

    /// A shared handle to the data store
    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    /// Bind `addr` and spawn the accept loop onto the runtime. The returned
    /// handle stops the server.
    pub async fn spawn_tcp(&self, addr: SocketAddr) -> Result<ServerHandle, std::io::Error> {
        self.spawn_tcp_inner(addr, None).await
    }

    /// Like [`Server::spawn_tcp`], wrapping every accepted connection in TLS
    #[cfg(feature = "tls")]
    pub async fn spawn_tls(
        &self,
        addr: SocketAddr,
        tls: crate::tcp::tls::TlsServerConfig,
    ) -> Result<ServerHandle, std::io::Error> {
        self.spawn_tcp_inner(addr, Some(tls)).await
    }

    async fn spawn_tcp_inner(
        &self,
        addr: SocketAddr,
        tls: MaybeTls,
    ) -> Result<ServerHandle, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();

        let accept = AcceptTask {
            listener,
            store: self.store.clone(),
            device: self.device.clone(),
            tracker: SessionTracker::wrapped(self.max_sessions),
            decode: self.decode,
            tls,
        };

        tokio::spawn(
            accept
                .run(shutdown_rx, done_tx)
                .instrument(tracing::info_span!("modbus-server", "listen" = ?local_addr)),
        );

        Ok(ServerHandle {
            local_addr: Some(local_addr),
            shutdown: shutdown_tx,
            done: done_rx,
        })
    }

    /// Serve RTU requests on the serial port at `path`. A serial line has a
    /// single peer, so this runs one session for the lifetime of the server.
    #[cfg(feature = "serial")]
    pub fn spawn_rtu(
        &self,
        path: &str,
        settings: crate::serial::SerialSettings,
    ) -> Result<ServerHandle, std::io::Error> {
        let port = crate::serial::open(path, settings)?;
        let phys = PhysLayer::new_serial(port, self.decode.physical);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();

        let mut session = SessionTask::new(
            phys,
            self.store.clone(),
            self.device.clone(),
            FramedReader::rtu_request(),
            FrameWriter::rtu(),
            shutdown_rx,
            self.decode,
        );

        let span = tracing::info_span!("modbus-server-rtu", "port" = %path);
        tokio::spawn(
            async move {
                loop {
                    match session.run().await {
                        Err(crate::error::RequestError::Shutdown) => {
                            tracing::info!("shutdown");
                            break;
                        }
                        Err(err) => {
                            tracing::warn!("session error: {}", err);
                            break;
                        }
                        Ok(()) => continue,
                    }
                }
                let _ = done_tx.send(());
            }
            .instrument(span),
        );

        Ok(ServerHandle {
            local_addr: None,
            shutdown: shutdown_tx,
            done: done_rx,
        })
    }
}

struct AcceptTask<S: DataStore> {
    listener: TcpListener,
    store: Arc<S>,
    device: Arc<DeviceIdentification>,
    tracker: SharedTracker,
    decode: DecodeLevel,
    tls: MaybeTls,
}

impl<S: DataStore> AcceptTask<S> {
    async fn run(self, mut shutdown: mpsc::Receiver<()>, done: oneshot::Sender<()>) {
        let mut sessions: JoinSet<()> = JoinSet::new();
        let AcceptTask {
            listener,
            store,
            device,
            tracker,
            decode,
            tls,
        } = self;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("server shutdown requested");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => Self::handle(
                            socket,
                            addr,
                            &mut sessions,
                            store.clone(),
                            device.clone(),
                            tracker.clone(),
                            decode,
                            tls.clone(),
                        ),
                        Err(err) => {
                            tracing::warn!("error accepting connection: {}", err);
                        }
                    }
                }
            }
        }

        // unblock accept permanently, then ask every session to stop
        drop(listener);
        tracker.lock().unwrap().clear();

        while sessions.join_next().await.is_some() {}
        let _ = done.send(());
    }

    #[allow(clippy::too_many_arguments)]
    fn handle(
        socket: TcpStream,
        addr: SocketAddr,
        sessions: &mut JoinSet<()>,
        store: Arc<S>,
        device: Arc<DeviceIdentification>,
        tracker: SharedTracker,
        decode: DecodeLevel,
        tls: MaybeTls,
    ) {
        let (tx, rx) = mpsc::channel(1);
        let id = tracker.lock().unwrap().add(tx);
        tracing::info!("accepted connection {} from: {}", id, addr);

        let span = tracing::info_span!("session", "remote" = ?addr);
        sessions.spawn(
            async move {
                // the handshake runs inside the task so that multiple TLS
                // handshakes can progress concurrently
                let phys = match Self::physical_layer(socket, decode, tls).await {
                    Ok(phys) => phys,
                    Err(err) => {
                        tracing::warn!("error from {}: {}", addr, err);
                        tracker.lock().unwrap().remove(id);
                        return;
                    }
                };

                let result = SessionTask::new(
                    phys,
                    store,
                    device,
                    FramedReader::mbap(),
                    FrameWriter::mbap(),
                    rx,
                    decode,
                )
                .run()
                .await;

                match result {
                    Err(crate::error::RequestError::Shutdown) => {
                        tracing::info!("session {} shutdown", id)
                    }
                    Err(err) => tracing::info!("session {} terminated: {}", id, err),
                    Ok(()) => {}
                }
                tracker.lock().unwrap().remove(id);
            }
            .instrument(span),
        );
    }

    async fn physical_layer(
        socket: TcpStream,
        decode: DecodeLevel,
        tls: MaybeTls,
    ) -> Result<PhysLayer, std::io::Error> {
        match tls {
            None => Ok(PhysLayer::new_tcp(socket, decode.physical)),
            #[cfg(feature = "tls")]
            Some(tls) => {
                let stream = tls.accept(socket).await?;
                Ok(PhysLayer::new_tls_server(stream, decode.physical))
            }
            #[cfg(not(feature = "tls"))]
            Some(never) => match never {},
        }
    }
}

/// Handle to a running server. Stopping through the handle triggers the
/// shutdown signal, closes the listener, signals every connection task, and
/// waits for them to drain.
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    shutdown: mpsc::Sender<()>,
    done: oneshot::Receiver<()>,
}

impl ServerHandle {
    /// The bound listen address, when the server listens on a socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the server and wait for every connection task to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.done.await;
    }

    /// Stop the server, waiting at most `timeout` for the connection tasks.
    /// Failing the deadline means tasks were still running when the call
    /// returned.
    pub async fn stop_with_timeout(mut self, timeout: Duration) -> Result<(), ShutdownTimedOut> {
        let _ = self.shutdown.send(()).await;
        match tokio::time::timeout(timeout, &mut self.done).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ShutdownTimedOut),
        }
    }
}
