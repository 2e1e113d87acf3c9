//! Networking for the tournament relay.
//!
//! Two listeners feed one [`PeerRegistry`]: framed TCP ([`tcp::TcpServer`])
//! and WebSocket ([`ws::WsGateway`]). Collaborators see both through the
//! [`Transport`] trait, correlate requests with [`correlator::Correlator`],
//! and probe other hosts with [`scraper::HostScraper`].

pub mod correlator;
mod error;
mod event;
pub mod hub;
mod listener;
mod registry;
pub mod scraper;
mod stream;
pub mod tcp;
mod transport;
pub mod ws;

pub use correlator::{Correlator, PendingRequest, Unanswered};
pub use error::{NetError, NetResult};
pub use event::{PeerInfo, PeerKind, Subscribers, Subscription, TransportEvent};
pub use hub::ReplicationHub;
pub use listener::dual_stack;
pub use registry::{PeerRegistry, SharedWriter};
pub use scraper::{HostScraper, ScrapeError, ScrapeIdentity, ScrapeProgress, ScraperConfig};
pub use stream::{read_chunk, ReadOutcome, READ_BUFFER_SIZE};
pub use tcp::{ClientConfig, TcpClient, TcpServer};
pub use transport::{Destination, Transport};
pub use ws::WsGateway;
