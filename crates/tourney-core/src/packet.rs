//! Protocol envelope.
//!
//! A packet carries exactly one payload from a closed set. Payload meaning
//! beyond connection setup and replication is left to collaborators, which
//! use the `Custom` variants and the opaque `data` values.

use crate::{ClientType, CoreServer, Match, PeerId, QualifierEvent, State, Tournament, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unit of communication between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Correlation id assigned by the sender.
    pub id: Uuid,
    /// Sender's peer id.
    #[serde(default)]
    pub from: PeerId,
    pub payload: Payload,
}

impl Packet {
    /// Create a packet with a fresh id, sent by the host.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: PeerId::HOST,
            payload: payload.into(),
        }
    }

    pub fn with_from(mut self, from: PeerId) -> Self {
        self.from = from;
        self
    }

    /// The request id this packet replies to, if it is a reply.
    pub fn responding_to(&self) -> Option<Uuid> {
        match &self.payload {
            Payload::Response(response) => Some(response.responding_to),
            Payload::Acknowledgement(ack) => Some(ack.packet_id),
            _ => None,
        }
    }

    /// Whether this packet answers the packet with id `id`.
    pub fn answers(&self, id: Uuid) -> bool {
        self.id == id || self.responding_to() == Some(id)
    }

    /// Short description for logs, e.g. `event(match_updated)`.
    pub fn describe(&self) -> String {
        match &self.payload {
            Payload::Request(Request::Connect { .. }) => "request(connect)".to_string(),
            Payload::Request(Request::Custom { name, .. }) => format!("request({name})"),
            Payload::Response(response) => format!("response({})", response.details.name()),
            Payload::Event(event) => format!("event({})", event.name()),
            Payload::Command(Command::Heartbeat) => "command(heartbeat)".to_string(),
            Payload::Command(Command::Custom { name, .. }) => format!("command({name})"),
            Payload::Push(push) => format!("push({})", push.name),
            Payload::Acknowledgement(_) => "acknowledgement".to_string(),
            Payload::ForwardingPacket(forward) => {
                format!("forwarding_packet({})", forward.packet.describe())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Request(Request),
    Response(Response),
    Event(Event),
    Command(Command),
    Push(Push),
    Acknowledgement(Acknowledgement),
    ForwardingPacket(Box<ForwardingPacket>),
}

impl From<Request> for Payload {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Payload {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Event> for Payload {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl From<Command> for Payload {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<Push> for Payload {
    fn from(push: Push) -> Self {
        Self::Push(push)
    }
}

impl From<Acknowledgement> for Payload {
    fn from(ack: Acknowledgement) -> Self {
        Self::Acknowledgement(ack)
    }
}

impl From<ForwardingPacket> for Payload {
    fn from(forward: ForwardingPacket) -> Self {
        Self::ForwardingPacket(Box::new(forward))
    }
}

/// Requests a peer expects an answer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// First packet on a new connection; answered with the host's full State.
    Connect {
        client_type: ClientType,
        name: String,
        #[serde(default)]
        user_id: String,
        client_version: u32,
    },
    /// Application-defined request.
    Custom {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub kind: ResponseKind,
    /// Id of the request packet being answered.
    pub responding_to: Uuid,
    pub details: ResponseDetails,
}

impl Response {
    pub fn success(responding_to: Uuid, details: ResponseDetails) -> Self {
        Self {
            kind: ResponseKind::Success,
            responding_to,
            details,
        }
    }

    pub fn fail(responding_to: Uuid, details: ResponseDetails) -> Self {
        Self {
            kind: ResponseKind::Fail,
            responding_to,
            details,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseDetails {
    Connect {
        #[serde(default)]
        state: State,
        server_version: u32,
        #[serde(default)]
        message: String,
    },
    Generic {
        #[serde(default)]
        message: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl ResponseDetails {
    fn name(&self) -> &'static str {
        match self {
            ResponseDetails::Connect { .. } => "connect",
            ResponseDetails::Generic { .. } => "generic",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ResponseDetails::Connect { message, .. } | ResponseDetails::Generic { message, .. } => {
                message
            }
        }
    }
}

/// Fire-and-forget instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Keep-alive sent by clients while connected.
    Heartbeat,
    Custom {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// Unsolicited data pushed to interested peers (e.g. a finished song).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub packet_id: Uuid,
}

/// Asks the receiving node to relay `packet` to `forward_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingPacket {
    pub forward_to: Vec<PeerId>,
    pub packet: Packet,
}

/// What happened to the changed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Added,
    Updated,
    Deleted,
}

/// The object a replication event is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTarget {
    User { tournament_id: Uuid, user: User },
    Match { tournament_id: Uuid, r#match: Match },
    Qualifier { tournament_id: Uuid, qualifier: QualifierEvent },
    Tournament { tournament: Tournament },
    Server { server: CoreServer },
}

/// A typed delta applied to every mirror of a State.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub change: Change,
    pub target: EventTarget,
}

impl Event {
    pub fn new(change: Change, target: EventTarget) -> Self {
        Self { change, target }
    }

    pub fn added(target: EventTarget) -> Self {
        Self::new(Change::Added, target)
    }

    pub fn updated(target: EventTarget) -> Self {
        Self::new(Change::Updated, target)
    }

    pub fn deleted(target: EventTarget) -> Self {
        Self::new(Change::Deleted, target)
    }

    /// Name like `user_added` or `server_deleted`.
    pub fn name(&self) -> String {
        let object = match &self.target {
            EventTarget::User { .. } => "user",
            EventTarget::Match { .. } => "match",
            EventTarget::Qualifier { .. } => "qualifier",
            EventTarget::Tournament { .. } => "tournament",
            EventTarget::Server { .. } => "server",
        };
        let change = match self.change {
            Change::Added => "added",
            Change::Updated => "updated",
            Change::Deleted => "deleted",
        };
        format!("{object}_{change}")
    }
}
