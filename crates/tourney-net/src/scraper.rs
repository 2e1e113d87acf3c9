//! Host discovery.
//!
//! Every probe is a short-lived [`TcpClient`]: connect, send a correlated
//! Connect request, take the State from the reply, disconnect. Hosts that
//! fail are left out of the results; a scan never aborts because of one.

use crate::correlator::{Correlator, Unanswered};
use crate::error::NetError;
use crate::tcp::{ClientConfig, TcpClient};
use crate::transport::Destination;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tourney_core::{
    ClientType, CoreServer, Event, EventTarget, Packet, Payload, Request, ResponseDetails, State,
    PROTOCOL_VERSION,
};

/// Who the scraper says it is in its Connect requests.
#[derive(Debug, Clone, Default)]
pub struct ScrapeIdentity {
    pub name: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// Rounds of harvesting known servers in [`HostScraper::discover`].
    pub max_rounds: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(4),
            response_timeout: Duration::from_secs(4),
            max_rounds: 8,
        }
    }
}

/// Running totals, reported after each host resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeProgress {
    /// The host that just resolved.
    pub host: CoreServer,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl ScrapeProgress {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("could not connect: {0}")]
    ConnectFailed(#[source] NetError),
    #[error("host did not answer in time")]
    TimedOut,
    #[error("host disconnected before answering")]
    Disconnected,
    #[error("host rejected the connection: {0}")]
    Rejected(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("failed to deliver packet: {0}")]
    Send(#[source] NetError),
}

impl From<Unanswered> for ScrapeError {
    fn from(reason: Unanswered) -> Self {
        match reason {
            Unanswered::TimedOut => ScrapeError::TimedOut,
            Unanswered::PeerDisconnected => ScrapeError::Disconnected,
        }
    }
}

/// A connected probe that has completed the Connect exchange.
struct Probe {
    client: Arc<TcpClient>,
    correlator: Correlator<TcpClient>,
    state: State,
}

impl Probe {
    fn destination(&self) -> Destination {
        Destination::Peer(self.client.server_id())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostScraper {
    identity: ScrapeIdentity,
    config: ScraperConfig,
    announce: Option<CoreServer>,
}

impl HostScraper {
    pub fn new(identity: ScrapeIdentity, config: ScraperConfig) -> Self {
        Self {
            identity,
            config,
            announce: None,
        }
    }

    /// Tell every scraped host about `server` (normally this node).
    pub fn announce_as(mut self, server: CoreServer) -> Self {
        self.announce = Some(server);
        self
    }

    /// Scrape `hosts` concurrently.
    pub async fn scrape_hosts<P>(
        &self,
        hosts: impl IntoIterator<Item = CoreServer>,
        mut on_progress: P,
    ) -> HashMap<CoreServer, State>
    where
        P: FnMut(&ScrapeProgress),
    {
        let mut seen = HashSet::new();
        let hosts: Vec<CoreServer> = hosts.into_iter().filter(|h| seen.insert(h.clone())).collect();
        let total = hosts.len();

        let mut pending: FuturesUnordered<_> = hosts
            .into_iter()
            .map(|host| async move {
                let result = self.scrape_host(&host).await;
                (host, result)
            })
            .collect();

        let mut states = HashMap::with_capacity(total);
        let (mut succeeded, mut failed) = (0, 0);
        while let Some((host, result)) = pending.next().await {
            match result {
                Ok(state) => {
                    succeeded += 1;
                    states.insert(host.clone(), state);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Failed to scrape {}: {}", host, e);
                }
            }
            on_progress(&ScrapeProgress {
                host,
                succeeded,
                failed,
                total,
            });
        }
        states
    }

    /// Fetch one host's State.
    pub async fn scrape_host(&self, host: &CoreServer) -> Result<State, ScrapeError> {
        let probe = self.open(host).await?;
        if let Some(server) = &self.announce {
            let event = Packet::new(Event::added(EventTarget::Server {
                server: server.clone(),
            }));
            if let Err(e) = probe.client.send(&event).await {
                tracing::debug!("Could not announce to {}: {}", host, e);
            }
        }
        probe.client.shutdown().await;
        Ok(probe.state)
    }

    /// Connect, deliver one packet, disconnect.
    pub async fn send_packet_to_host(&self, host: &CoreServer, packet: &Packet) -> Result<(), ScrapeError> {
        let probe = self.open(host).await?;
        let result = probe.client.send(packet).await.map_err(ScrapeError::Send);
        probe.client.shutdown().await;
        result
    }

    /// Connect, send `packet` and return the first packet answering it.
    pub async fn request_response(&self, host: &CoreServer, packet: &Packet) -> Result<Packet, ScrapeError> {
        let probe = self.open(host).await?;
        let result = probe.correlator.request(probe.destination(), packet).await;
        probe.client.shutdown().await;
        Ok(Arc::unwrap_or_clone(result?))
    }

    /// Walk the federation from `seeds`, scraping every server any scraped
    /// host knows about until nothing new turns up.
    pub async fn discover<P>(
        &self,
        seeds: impl IntoIterator<Item = CoreServer>,
        mut on_progress: P,
    ) -> HashMap<CoreServer, State>
    where
        P: FnMut(&ScrapeProgress),
    {
        let mut visited: HashSet<CoreServer> = HashSet::new();
        let mut results = HashMap::new();
        let mut frontier: Vec<CoreServer> = seeds.into_iter().collect();

        for round in 0..self.config.max_rounds {
            frontier.retain(|host| visited.insert(host.clone()));
            if frontier.is_empty() {
                break;
            }
            tracing::info!("Discovery round {}: {} host(s)", round + 1, frontier.len());

            let states = self
                .scrape_hosts(std::mem::take(&mut frontier), &mut on_progress)
                .await;
            frontier = states
                .values()
                .flat_map(|state| state.known_servers.iter())
                .filter(|server| !visited.contains(*server))
                .cloned()
                .collect();
            results.extend(states);
        }
        results
    }

    async fn open(&self, host: &CoreServer) -> Result<Probe, ScrapeError> {
        let client = Arc::new(TcpClient::new(
            host.clone(),
            ClientConfig {
                connect_timeout: self.config.connect_timeout,
                heartbeat: None,
            },
        ));
        client.start().await.map_err(ScrapeError::ConnectFailed)?;

        let correlator = Correlator::new(client.clone(), self.config.response_timeout);
        let connect = Packet::new(Request::Connect {
            client_type: ClientType::TemporaryConnection,
            name: self.identity.name.clone(),
            user_id: self.identity.user_id.clone(),
            client_version: PROTOCOL_VERSION,
        });
        let destination = Destination::Peer(client.server_id());

        let state = match correlator.request(destination, &connect).await {
            Ok(reply) => connect_state(&reply),
            Err(e) => Err(e.into()),
        };
        match state {
            Ok(state) => Ok(Probe {
                client,
                correlator,
                state,
            }),
            Err(e) => {
                client.shutdown().await;
                Err(e)
            }
        }
    }
}

fn connect_state(reply: &Packet) -> Result<State, ScrapeError> {
    let Payload::Response(response) = &reply.payload else {
        return Err(ScrapeError::UnexpectedReply(reply.describe()));
    };
    match &response.details {
        ResponseDetails::Connect { state, .. } if response.is_success() => Ok(state.clone()),
        details if !response.is_success() => Err(ScrapeError::Rejected(details.message().to_string())),
        _ => Err(ScrapeError::UnexpectedReply(reply.describe())),
    }
}
