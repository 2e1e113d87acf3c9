//! Framed TCP client: one outbound connection to a host.

use super::read_framed;
use crate::error::{NetError, NetResult};
use crate::event::{PeerInfo, PeerKind, Subscribers, Subscription, TransportEvent};
use crate::registry::SharedWriter;
use crate::stream::configure_stream;
use crate::transport::{Destination, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tourney_core::{codec, Command, ConnectionState, CoreServer, Packet, PeerId};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `start` waits for the TCP connection.
    pub connect_timeout: Duration,
    /// Send `Command::Heartbeat` this often while connected.
    pub heartbeat: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(4),
            heartbeat: None,
        }
    }
}

struct Connection {
    info: PeerInfo,
    writer: SharedWriter,
}

/// State shared with the read loop and heartbeat task.
struct Shared {
    subscribers: Subscribers,
    connection: tokio::sync::Mutex<Option<Connection>>,
    state: Mutex<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Drop the connection, reporting it once.
    async fn disconnect(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from {}", connection.info.addr);
        self.subscribers
            .emit(TransportEvent::Disconnected(connection.info));
    }
}

pub struct TcpClient {
    host: CoreServer,
    config: ClientConfig,
    server_id: PeerId,
    shared: Arc<Shared>,
    started: AtomicBool,
    close: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpClient {
    pub fn new(host: CoreServer, config: ClientConfig) -> Self {
        let (close, _) = watch::channel(false);
        Self {
            host,
            config,
            server_id: PeerId::new(),
            shared: Arc::new(Shared {
                subscribers: Subscribers::new(),
                connection: tokio::sync::Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
            }),
            started: AtomicBool::new(false),
            close,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create and start a client.
    pub async fn connect(host: CoreServer, config: ClientConfig) -> NetResult<Self> {
        let client = Self::new(host, config);
        client.start().await?;
        Ok(client)
    }

    pub fn host(&self) -> &CoreServer {
        &self.host
    }

    /// Id under which the host's packets are reported.
    pub fn server_id(&self) -> PeerId {
        self.server_id
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.subscribers.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect to the host. Emits `Connected` or `FailedToConnect`, once.
    pub async fn start(&self) -> NetResult<PeerInfo> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyStarted);
        }
        self.shared.set_state(ConnectionState::Connecting);

        let target = self.host.to_string();
        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(target.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.failed(NetError::Io(e))),
            Err(_) => return Err(self.failed(NetError::ConnectTimeout(target))),
        };

        if let Err(e) = configure_stream(&stream) {
            tracing::debug!("Could not set socket options for {}: {}", self.host, e);
        }
        let addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => return Err(self.failed(NetError::Io(e))),
        };

        let info = PeerInfo {
            id: self.server_id,
            addr,
            kind: PeerKind::Framed,
        };
        let (reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));

        *self.shared.connection.lock().await = Some(Connection {
            info: info.clone(),
            writer: writer.clone(),
        });
        self.shared.set_state(ConnectionState::Connected);
        tracing::info!("Connected to {} ({})", self.host, addr);
        self.shared
            .subscribers
            .emit(TransportEvent::Connected(info.clone()));

        let mut tasks = Vec::with_capacity(2);
        let shared = self.shared.clone();
        let close = self.close.subscribe();
        let peer = info.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = read_framed(reader, &peer, &shared.subscribers, close).await {
                tracing::debug!("Connection to {} faulted: {}", peer.addr, e);
            }
            shared.disconnect().await;
        }));

        if let Some(every) = self.config.heartbeat {
            tasks.push(spawn_heartbeat(writer, every, self.close.subscribe()));
        }
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);

        Ok(info)
    }

    fn failed(&self, error: NetError) -> NetError {
        tracing::warn!("Failed to connect to {}: {}", self.host, error);
        self.shared.set_state(ConnectionState::FailedToConnect);
        self.shared.subscribers.emit(TransportEvent::FailedToConnect {
            reason: error.to_string(),
        });
        error
    }

    /// Send one packet to the host.
    pub async fn send(&self, packet: &Packet) -> NetResult<()> {
        let writer = match self.shared.connection.lock().await.as_ref() {
            Some(connection) => connection.writer.clone(),
            None => return Err(NetError::NotConnected),
        };
        let bytes = codec::serialize(packet)?;

        tracing::debug!("Sending {} to {}", packet.describe(), self.host);
        let result = writer.lock().await.write_all(&bytes).await;
        if let Err(e) = result {
            self.close.send_replace(true);
            return Err(NetError::Io(e));
        }
        Ok(())
    }

    /// Close the connection and wait for the read loop to report it.
    pub async fn shutdown(&self) {
        self.close.send_replace(true);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        self.shared.disconnect().await;
    }
}

impl Transport for TcpClient {
    fn subscribe(&self) -> Subscription {
        TcpClient::subscribe(self)
    }

    /// Everything goes to the host; `to` is not consulted.
    async fn send(&self, _to: Destination, packet: &Packet) {
        if let Err(e) = TcpClient::send(self, packet).await {
            tracing::debug!("Dropped {} for {}: {}", packet.describe(), self.host, e);
        }
    }
}

fn spawn_heartbeat(
    writer: SharedWriter,
    every: Duration,
    mut close: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = close.changed() => break,
                _ = ticker.tick() => {
                    let bytes = match codec::serialize(&Packet::new(Command::Heartbeat)) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::warn!("Failed to encode heartbeat: {}", e);
                            break;
                        }
                    };
                    if writer.lock().await.write_all(&bytes).await.is_err() {
                        break;
                    }
                    tracing::trace!("Sent heartbeat");
                }
            }
        }
    })
}
