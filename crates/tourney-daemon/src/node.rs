//! A running relay node: both listeners, the replication hub, and the
//! federation chores (announcing to the master, periodic rescans).

use crate::config::DaemonConfig;
use std::future::Future;
use tokio::task::JoinHandle;
use tourney_core::{CoreServer, Event, EventTarget, PeerId, State};
use tourney_net::{
    HostScraper, NetResult, PeerRegistry, ReplicationHub, ScrapeError, ScrapeIdentity, TcpServer,
    WsGateway,
};

pub struct Node {
    config: DaemonConfig,
    tcp: TcpServer,
    ws: Option<WsGateway>,
    hub: ReplicationHub<PeerRegistry>,
    hub_task: JoinHandle<()>,
}

impl Node {
    /// Bind the listeners and start serving. A zero port in `config` is
    /// replaced by the port the OS picked.
    pub async fn start(mut config: DaemonConfig) -> NetResult<Self> {
        let registry = PeerRegistry::shared();

        let tcp = TcpServer::bind_dual_stack(config.port, registry.clone()).await?;
        if let Some(addr) = tcp.local_addrs().first() {
            config.port = addr.port();
        }
        tracing::info!("Framed TCP listening on {:?}", tcp.local_addrs());

        let ws = match config.websocket_port {
            Some(port) => {
                let ws = WsGateway::bind_dual_stack(port, registry.clone()).await?;
                if let Some(addr) = ws.local_addrs().first() {
                    config.websocket_port = Some(addr.port());
                }
                tracing::info!("WebSocket listening on {:?}", ws.local_addrs());
                Some(ws)
            }
            None => None,
        };

        let state = State {
            tournaments: Vec::new(),
            known_servers: vec![config.self_server()],
        };
        let hub = ReplicationHub::new(registry, state);
        let hub_task = hub.spawn();

        tracing::info!("{} is up as {}", config.server_name, config.self_server());
        Ok(Self {
            config,
            tcp,
            ws,
            hub,
            hub_task,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn hub(&self) -> &ReplicationHub<PeerRegistry> {
        &self.hub
    }

    /// This node's own `known_servers` entry.
    pub fn self_server(&self) -> CoreServer {
        self.config.self_server()
    }

    fn scraper(&self) -> HostScraper {
        let identity = ScrapeIdentity {
            name: self.config.server_name.clone(),
            user_id: PeerId::HOST.to_string(),
        };
        HostScraper::new(identity, self.config.scraper.clone()).announce_as(self.self_server())
    }

    /// Add every server not yet known. Returns how many were new.
    pub async fn merge_servers(&self, servers: impl IntoIterator<Item = CoreServer>) -> usize {
        let me = self.self_server();
        let mut added = 0;
        for server in servers {
            if server == me {
                continue;
            }
            let label = server.to_string();
            match self.hub.publish(Event::added(EventTarget::Server { server })).await {
                Ok(true) => {
                    tracing::info!("Learned about {}", label);
                    added += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Could not record {}: {}", label, e),
            }
        }
        added
    }

    /// Register with the master and adopt the servers it knows.
    pub async fn announce(&self) -> Result<usize, ScrapeError> {
        let Some(master) = self.config.master.clone() else {
            return Ok(0);
        };
        if master == self.self_server() {
            tracing::debug!("This node is the master, nothing to announce");
            return Ok(0);
        }

        tracing::info!("Announcing to master {}", master);
        let state = self.scraper().scrape_host(&master).await?;
        let mut servers = state.known_servers;
        servers.push(master);
        Ok(self.merge_servers(servers).await)
    }

    /// Walk the federation from every known server and merge what turns up.
    pub async fn rescan(&self) -> usize {
        let me = self.self_server();
        let seeds: Vec<CoreServer> = self
            .hub
            .state()
            .await
            .known_servers
            .into_iter()
            .filter(|server| *server != me)
            .collect();
        if seeds.is_empty() {
            return 0;
        }

        let states = self
            .scraper()
            .discover(seeds, |progress| {
                tracing::debug!(
                    "Rescan {}/{} ({} failed)",
                    progress.completed(),
                    progress.total,
                    progress.failed
                );
            })
            .await;
        tracing::info!("Rescan reached {} host(s)", states.len());

        let mut found: Vec<CoreServer> = Vec::new();
        for (host, state) in states {
            found.push(host);
            found.extend(state.known_servers);
        }
        self.merge_servers(found).await
    }

    /// Announce, rescan on the configured interval, and shut down once
    /// `stop` resolves.
    pub async fn run_until(self, stop: impl Future<Output = ()>) {
        if let Err(e) = self.announce().await {
            tracing::warn!("Announce failed: {}", e);
        }

        tokio::pin!(stop);
        match self.config.rescan_interval {
            Some(period) => {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = ticker.tick() => {
                            self.rescan().await;
                        }
                    }
                }
            }
            None => stop.await,
        }

        self.shutdown().await;
    }

    /// Stop both listeners and drop every peer.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down {}", self.config.server_name);
        self.tcp.shutdown().await;
        if let Some(ws) = &self.ws {
            ws.shutdown().await;
        }
        self.hub_task.abort();
    }
}
