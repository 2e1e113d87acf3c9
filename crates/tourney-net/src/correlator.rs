//! Request/response correlation over any [`Transport`].
//!
//! A registration is a transport subscription plus a timer, both armed
//! before the request goes out. It resolves exactly once: a satisfying
//! reply, the timer, or the scoped peer disconnecting. Dropping the
//! subscription on resolution is what makes later packets harmless.

use crate::event::{PeerInfo, Subscription, TransportEvent};
use crate::transport::{Destination, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tourney_core::Packet;
use uuid::Uuid;

/// Why a request went unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unanswered {
    #[error("request timed out")]
    TimedOut,
    #[error("peer disconnected before answering")]
    PeerDisconnected,
}

pub struct Correlator<T> {
    transport: Arc<T>,
    default_timeout: Duration,
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            default_timeout: self.default_timeout,
        }
    }
}

impl<T: Transport> Correlator<T> {
    pub fn new(transport: Arc<T>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `request` and wait for a reply.
    ///
    /// When `to` names a single peer only its packets are considered. With
    /// `expected_id`, only packets answering that id are. `on_received`
    /// returns `true` once satisfied; `false` keeps listening.
    pub async fn send_and_await<F>(
        &self,
        to: Destination,
        request: &Packet,
        expected_id: Option<Uuid>,
        timeout: Duration,
        on_received: F,
    ) -> Result<Arc<Packet>, Unanswered>
    where
        F: FnMut(&PeerInfo, &Packet) -> bool,
    {
        let events = self.transport.subscribe();
        await_reply(
            &*self.transport,
            events,
            to,
            request,
            expected_id,
            timeout,
            on_received,
        )
        .await
    }

    /// First packet answering `packet`, within the default timeout.
    pub async fn request(&self, to: Destination, packet: &Packet) -> Result<Arc<Packet>, Unanswered> {
        self.send_and_await(to, packet, Some(packet.id), self.default_timeout, |_, _| true)
            .await
    }

    /// Callback form of [`send_and_await`](Self::send_and_await).
    ///
    /// Exactly one of `on_received` returning `true` or `on_unanswered` runs,
    /// unless the request is cancelled first, in which case neither does.
    pub fn spawn<F, U>(
        &self,
        to: Destination,
        request: Packet,
        expected_id: Option<Uuid>,
        timeout: Duration,
        on_received: F,
        on_unanswered: U,
    ) -> PendingRequest
    where
        F: FnMut(&PeerInfo, &Packet) -> bool + Send + 'static,
        U: FnOnce(Unanswered) + Send + 'static,
    {
        let transport = self.transport.clone();
        let events = transport.subscribe();
        let task = tokio::spawn(async move {
            let result = await_reply(
                &*transport,
                events,
                to,
                &request,
                expected_id,
                timeout,
                on_received,
            )
            .await;
            if let Err(reason) = result {
                on_unanswered(reason);
            }
        });
        PendingRequest { task }
    }
}

/// Handle to a request started with [`Correlator::spawn`].
#[derive(Debug)]
pub struct PendingRequest {
    task: JoinHandle<()>,
}

impl PendingRequest {
    /// Drop the registration without running either callback.
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for resolution. `false` if the request was cancelled.
    pub async fn finished(self) -> bool {
        self.task.await.is_ok()
    }
}

async fn await_reply<T, F>(
    transport: &T,
    mut events: Subscription,
    to: Destination,
    request: &Packet,
    expected_id: Option<Uuid>,
    timeout: Duration,
    mut on_received: F,
) -> Result<Arc<Packet>, Unanswered>
where
    T: Transport,
    F: FnMut(&PeerInfo, &Packet) -> bool,
{
    let scope = to.single_peer();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    transport.send(to, request).await;

    loop {
        let event = tokio::select! {
            _ = &mut deadline => {
                tracing::debug!("No reply to {} within {:?}", request.describe(), timeout);
                return Err(Unanswered::TimedOut);
            }
            event = events.recv() => event,
        };

        match event {
            Some(TransportEvent::Packet { peer, packet }) => {
                if scope.is_some_and(|id| id != peer.id) {
                    continue;
                }
                if expected_id.is_some_and(|id| !packet.answers(id)) {
                    continue;
                }
                if on_received(&peer, &packet) {
                    return Ok(packet);
                }
            }
            Some(TransportEvent::Disconnected(peer)) if scope == Some(peer.id) => {
                return Err(Unanswered::PeerDisconnected);
            }
            Some(_) => {}
            None => return Err(Unanswered::PeerDisconnected),
        }
    }
}
