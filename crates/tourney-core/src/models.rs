//! Aggregate state a host hands to newly connected peers.
//!
//! Only identity and ownership are modelled here. Everything a collaborator
//! attaches (scores, song selection, team settings) rides along in the
//! `data`/`settings` values untouched.

use crate::CoreServer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of client a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    Player,
    Coordinator,
    /// Short-lived connection opened by a scraper.
    TemporaryConnection,
    WebsocketConnection,
}

/// A connected user within a tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub guid: Uuid,
    pub name: String,
    #[serde(default)]
    pub client_type: ClientType,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A match between users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub guid: Uuid,
    #[serde(default)]
    pub leader: Option<Uuid>,
    #[serde(default)]
    pub associated_users: Vec<Uuid>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A qualifier event and its leaderboard data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifierEvent {
    pub guid: Uuid,
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub guid: Uuid,
    pub name: String,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub matches: Vec<Match>,
    #[serde(default)]
    pub qualifiers: Vec<QualifierEvent>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Tournament {
    pub fn new(guid: Uuid, name: impl Into<String>) -> Self {
        Self {
            guid,
            name: name.into(),
            users: Vec::new(),
            matches: Vec::new(),
            qualifiers: Vec::new(),
            settings: serde_json::Value::Null,
        }
    }
}

/// A node's full snapshot: tournaments plus the federation membership list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub tournaments: Vec<Tournament>,
    #[serde(default)]
    pub known_servers: Vec<CoreServer>,
}

impl State {
    pub fn tournament(&self, guid: Uuid) -> Option<&Tournament> {
        self.tournaments.iter().find(|t| t.guid == guid)
    }

    pub fn tournament_mut(&mut self, guid: Uuid) -> Option<&mut Tournament> {
        self.tournaments.iter_mut().find(|t| t.guid == guid)
    }

    pub fn knows_server(&self, server: &CoreServer) -> bool {
        self.known_servers.iter().any(|s| s == server)
    }
}
