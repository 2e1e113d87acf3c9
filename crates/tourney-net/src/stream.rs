//! Socket reads and per-stream options.

use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

/// Size of the per-peer read buffer.
pub const READ_BUFFER_SIZE: usize = 8192;

const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Result of one read from a peer.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes landed in the buffer.
    Data(usize),
    /// Orderly close (zero-byte read).
    Closed,
    Faulted(io::Error),
}

pub async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> ReadOutcome {
    match reader.read(buf).await {
        Ok(0) => ReadOutcome::Closed,
        Ok(n) => ReadOutcome::Data(n),
        Err(e) => ReadOutcome::Faulted(e),
    }
}

pub(crate) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let socket = SockRef::from(stream);
    socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
    Ok(())
}
