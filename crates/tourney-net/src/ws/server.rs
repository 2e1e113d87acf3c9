//! Accepting WebSocket peers.

use super::frame::{self, Frame, FrameDecoder, FrameError, Opcode};
use super::handshake::{self, BAD_REQUEST, HANDSHAKE_TIMEOUT};
use crate::error::{NetError, NetResult};
use crate::event::{PeerInfo, PeerKind, Subscribers, Subscription, TransportEvent};
use crate::listener::{dual_stack, AcceptLoops};
use crate::registry::{PeerRegistry, SharedWriter};
use crate::stream::{configure_stream, read_chunk, ReadOutcome, READ_BUFFER_SIZE};
use crate::transport::{Destination, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tourney_core::codec::{self, MAX_PAYLOAD_SIZE};
use tourney_core::{Packet, PeerId};

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_TOO_BIG: u16 = 1009;

/// Accepts WebSocket connections into a [`PeerRegistry`].
pub struct WsGateway {
    registry: Arc<PeerRegistry>,
    listeners: AcceptLoops,
}

impl WsGateway {
    pub async fn bind(addrs: &[SocketAddr], registry: Arc<PeerRegistry>) -> NetResult<Self> {
        let accept_registry = registry.clone();
        let listeners = AcceptLoops::start(addrs, "websocket", move |stream, addr| {
            handle_connection(stream, addr, accept_registry.clone())
        })?;
        Ok(Self {
            registry,
            listeners,
        })
    }

    pub async fn bind_dual_stack(port: u16, registry: Arc<PeerRegistry>) -> NetResult<Self> {
        Self::bind(&dual_stack(port), registry).await
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        self.listeners.local_addrs()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Stop listening and drop every WebSocket peer.
    pub async fn shutdown(&self) {
        self.listeners.stop().await;
        self.registry.disconnect_kind(PeerKind::WebSocket).await;
    }
}

impl Transport for WsGateway {
    fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }

    async fn send(&self, to: Destination, packet: &Packet) {
        self.registry.send(&to, packet).await
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, registry: Arc<PeerRegistry>) {
    if let Err(e) = configure_stream(&stream) {
        tracing::debug!("Could not set socket options for {}: {}", addr, e);
    }
    let (mut reader, mut writer) = stream.into_split();

    let upgrade = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake::read_request(&mut reader))
        .await
        .unwrap_or(Err(handshake::HandshakeError::TimedOut));
    let leftover = match upgrade {
        Ok((request, leftover)) => {
            if let Err(e) = writer.write_all(handshake::response(&request).as_bytes()).await {
                tracing::debug!("Handshake reply to {} failed: {}", addr, e);
                return;
            }
            tracing::debug!("WebSocket upgrade from {} for {}", addr, request.path);
            leftover
        }
        Err(e) => {
            tracing::debug!("Rejected WebSocket handshake from {}: {}", addr, e);
            let _ = writer.write_all(BAD_REQUEST.as_bytes()).await;
            let _ = writer.shutdown().await;
            return;
        }
    };

    let info = PeerInfo {
        id: PeerId::new(),
        addr,
        kind: PeerKind::WebSocket,
    };
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let close = registry.register(info.clone(), writer.clone()).await;

    let mut connection = Connection {
        peer: &info,
        writer: &writer,
        subscribers: registry.subscribers(),
        decoder: FrameDecoder::new(),
        message: None,
        close,
    };
    connection.decoder.extend(&leftover);
    if let Err(e) = connection.run(reader).await {
        tracing::debug!("WebSocket connection from {} ended: {}", addr, e);
    }
    registry.unregister(info.id).await;
}

/// A message being assembled from fragments.
struct PartialMessage {
    data: Vec<u8>,
}

/// Per-peer read state, owned by the read loop.
struct Connection<'a> {
    peer: &'a PeerInfo,
    writer: &'a SharedWriter,
    subscribers: &'a Subscribers,
    decoder: FrameDecoder,
    message: Option<PartialMessage>,
    /// Flips to `true` once the registry has dropped this peer.
    close: watch::Receiver<bool>,
}

/// What to do after handling a frame.
enum Flow {
    Continue,
    Stop,
}

impl Connection<'_> {
    async fn run(&mut self, mut reader: OwnedReadHalf) -> NetResult<()> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            // Frames that arrived with the handshake or the last read.
            loop {
                let frame = match self.decoder.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        let code = match e {
                            FrameError::TooLarge(_) => CLOSE_TOO_BIG,
                            _ => CLOSE_PROTOCOL_ERROR,
                        };
                        self.send_close(code).await;
                        return Err(NetError::Frame(e));
                    }
                };
                if let Flow::Stop = self.handle_frame(frame).await? {
                    return Ok(());
                }
            }

            let outcome = tokio::select! {
                _ = self.close.changed() => return Ok(()),
                outcome = read_chunk(&mut reader, &mut buf) => outcome,
            };
            match outcome {
                ReadOutcome::Data(n) => self.decoder.extend(&buf[..n]),
                ReadOutcome::Closed => return Ok(()),
                ReadOutcome::Faulted(e) => return Err(NetError::Io(e)),
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> NetResult<Flow> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.message.is_some() {
                    self.send_close(CLOSE_PROTOCOL_ERROR).await;
                    return Ok(Flow::Stop);
                }
                if frame.fin {
                    return Ok(self.deliver(&frame.payload));
                } else {
                    self.message = Some(PartialMessage {
                        data: frame.payload,
                    });
                }
            }
            Opcode::Continuation => {
                let Some(message) = self.message.as_mut() else {
                    self.send_close(CLOSE_PROTOCOL_ERROR).await;
                    return Ok(Flow::Stop);
                };
                if message.data.len() + frame.payload.len() > MAX_PAYLOAD_SIZE {
                    self.send_close(CLOSE_TOO_BIG).await;
                    return Ok(Flow::Stop);
                }
                message.data.extend_from_slice(&frame.payload);
                if frame.fin {
                    if let Some(message) = self.message.take() {
                        return Ok(self.deliver(&message.data));
                    }
                }
            }
            Opcode::Ping => {
                self.write(&frame::encode(Opcode::Pong, &frame.payload, None))
                    .await?;
            }
            Opcode::Pong => {}
            Opcode::Close => {
                let code = match frame.payload.get(..2) {
                    Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
                    _ => CLOSE_NORMAL,
                };
                tracing::debug!("Close frame from {} ({})", self.peer.addr, code);
                self.send_close(code).await;
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Emit one complete message. Stops once the peer has been removed.
    fn deliver(&self, data: &[u8]) -> Flow {
        if data.is_empty() {
            return Flow::Continue;
        }
        match codec::decode_payload(data) {
            Ok(packet) => {
                let closed = self.close.borrow();
                if *closed {
                    return Flow::Stop;
                }
                tracing::debug!("Received {} from {}", packet.describe(), self.peer.addr);
                self.subscribers.emit(TransportEvent::Packet {
                    peer: self.peer.clone(),
                    packet: Arc::new(packet),
                });
            }
            Err(e) => {
                tracing::warn!("Dropped malformed packet from {}: {}", self.peer.addr, e);
            }
        }
        Flow::Continue
    }

    async fn write(&self, bytes: &[u8]) -> NetResult<()> {
        self.writer.lock().await.write_all(bytes).await?;
        Ok(())
    }

    async fn send_close(&self, code: u16) {
        let frame = frame::encode(Opcode::Close, &frame::close_payload(code, ""), None);
        let _ = self.write(&frame).await;
    }
}
