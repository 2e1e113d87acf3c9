//! Length-framed packets over raw TCP.

mod client;
mod server;

pub use client::{ClientConfig, TcpClient};
pub use server::TcpServer;

use crate::event::{PeerInfo, Subscribers, TransportEvent};
use crate::stream::{read_chunk, ReadOutcome, READ_BUFFER_SIZE};
use std::io;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tourney_core::Reassembler;

/// Read framed packets from `reader` until the peer goes away or `close`
/// fires. Returns `Ok` for an orderly end. Nothing is emitted once `close`
/// is set, even for packets already buffered.
pub(crate) async fn read_framed(
    mut reader: OwnedReadHalf,
    peer: &PeerInfo,
    subscribers: &Subscribers,
    mut close: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut reassembler = Reassembler::new();

    loop {
        let outcome = tokio::select! {
            _ = close.changed() => return Ok(()),
            outcome = read_chunk(&mut reader, &mut buf) => outcome,
        };

        let n = match outcome {
            ReadOutcome::Data(n) => n,
            ReadOutcome::Closed => return Ok(()),
            ReadOutcome::Faulted(e) => return Err(e),
        };

        reassembler.extend(&buf[..n]);
        while let Some(result) = reassembler.next_packet() {
            match result {
                Ok(packet) => {
                    // Held across the emit so removal cannot slip in between.
                    let closed = close.borrow();
                    if *closed {
                        return Ok(());
                    }
                    tracing::debug!("Received {} from {}", packet.describe(), peer.addr);
                    subscribers.emit(TransportEvent::Packet {
                        peer: peer.clone(),
                        packet: Arc::new(packet),
                    });
                }
                Err(e) => {
                    tracing::warn!("Dropped malformed packet from {}: {}", peer.addr, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PeerKind;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tourney_core::{codec, Command, Packet, PeerId};

    #[tokio::test]
    async fn buffered_packets_are_dropped_once_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut remote = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (accepted, addr) = listener.accept().await.unwrap();

        let mut bytes = codec::serialize(&Packet::new(Command::Heartbeat)).unwrap();
        bytes.extend(codec::serialize(&Packet::new(Command::Heartbeat)).unwrap());
        remote.write_all(&bytes).await.unwrap();

        let subscribers = Subscribers::new();
        let mut events = subscribers.subscribe();
        let (close, closed) = watch::channel(false);
        close.send_replace(true);

        let peer = PeerInfo {
            id: PeerId::new(),
            addr,
            kind: PeerKind::Framed,
        };
        let (reader, _writer) = accepted.into_split();
        read_framed(reader, &peer, &subscribers, closed).await.unwrap();

        assert!(events.try_recv().is_err());
    }
}
