//! Listening sockets and accept loops.

use crate::error::{NetError, NetResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const BACKLOG: i32 = 1024;

/// `0.0.0.0:port` and `[::]:port`.
pub fn dual_stack(port: u16) -> Vec<SocketAddr> {
    vec![
        (Ipv4Addr::UNSPECIFIED, port).into(),
        (Ipv6Addr::UNSPECIFIED, port).into(),
    ]
}

fn bind_one(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Bind every address. A zero port after the first bind reuses the port the
/// first listener got, so `dual_stack(0)` yields one port on both families.
/// IPv6 failures are tolerated once something else is bound.
fn bind_all(addrs: &[SocketAddr]) -> NetResult<Vec<TcpListener>> {
    let mut listeners: Vec<TcpListener> = Vec::new();
    let mut first_port = None;

    for &addr in addrs {
        let mut addr = addr;
        if addr.port() == 0 {
            if let Some(port) = first_port {
                addr.set_port(port);
            }
        }

        match bind_one(addr) {
            Ok(listener) => {
                let local = listener.local_addr()?;
                first_port.get_or_insert(local.port());
                listeners.push(listener);
            }
            Err(e) if addr.is_ipv6() && !listeners.is_empty() => {
                tracing::warn!("Could not bind {}, continuing without it: {}", addr, e);
            }
            Err(e) => return Err(NetError::Io(e)),
        }
    }

    if listeners.is_empty() {
        return Err(NetError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no listen addresses given",
        )));
    }
    Ok(listeners)
}

/// Running accept loops for one server.
pub(crate) struct AcceptLoops {
    local_addrs: Vec<SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AcceptLoops {
    /// Bind `addrs` and spawn one accept loop per listener. Each accepted
    /// stream is handed to `on_accept` in its own task.
    pub(crate) fn start<F, Fut>(addrs: &[SocketAddr], label: &'static str, on_accept: F) -> NetResult<Self>
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listeners = bind_all(addrs)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut tasks = Vec::with_capacity(listeners.len());

        for listener in listeners {
            let local = listener.local_addr()?;
            tracing::info!("Listening for {} connections on {}", label, local);
            local_addrs.push(local);
            tasks.push(spawn_accept_loop(
                listener,
                shutdown_tx.subscribe(),
                on_accept.clone(),
            ));
        }

        Ok(Self {
            local_addrs,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    pub(crate) fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Stop accepting. Already accepted peers are left alone.
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Keep calling `accept` until it yields a connection, sleeping
/// `ACCEPT_BACKOFF` after each error.
async fn accept_next<T, Fut>(mut accept: impl FnMut() -> Fut) -> T
where
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::warn!("Accept error, retrying in {:?}: {}", ACCEPT_BACKOFF, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

fn spawn_accept_loop<F, Fut>(
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
    on_accept: F,
) -> JoinHandle<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                (stream, addr) = accept_next(|| listener.accept()) => {
                    tracing::debug!("Accepted connection from {}", addr);
                    tokio::spawn(on_accept(stream, addr));
                }
            }
        }
    })
}
