//! Applying replication events to a local State mirror.
//!
//! A mirror is replaced wholesale exactly once, by the host's Connect
//! response. After that only events touch it. Applying the same event twice
//! leaves the state unchanged.

use crate::{Change, Event, EventTarget, Packet, Payload, ResponseDetails, State};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    #[error("event names unknown tournament {0}")]
    UnknownTournament(Uuid),
}

/// Upsert/remove helpers keyed by identity.
fn apply_to<T: PartialEq + Clone>(
    items: &mut Vec<T>,
    change: Change,
    item: &T,
    same: impl Fn(&T, &T) -> bool,
) -> bool {
    let existing = items.iter().position(|i| same(i, item));
    match (change, existing) {
        (Change::Added, Some(_)) => false,
        (Change::Added | Change::Updated, None) => {
            items.push(item.clone());
            true
        }
        (Change::Updated, Some(index)) => {
            if items[index] == *item {
                false
            } else {
                items[index] = item.clone();
                true
            }
        }
        (Change::Deleted, Some(index)) => {
            items.remove(index);
            true
        }
        (Change::Deleted, None) => false,
    }
}

impl State {
    /// Apply one event. Returns whether the state changed.
    pub fn apply(&mut self, event: &Event) -> Result<bool, ReplicationError> {
        let change = event.change;
        let changed = match &event.target {
            EventTarget::User {
                tournament_id,
                user,
            } => {
                let tournament = self.scoped(*tournament_id)?;
                apply_to(&mut tournament.users, change, user, |a, b| a.guid == b.guid)
            }
            EventTarget::Match {
                tournament_id,
                r#match,
            } => {
                let tournament = self.scoped(*tournament_id)?;
                apply_to(&mut tournament.matches, change, r#match, |a, b| {
                    a.guid == b.guid
                })
            }
            EventTarget::Qualifier {
                tournament_id,
                qualifier,
            } => {
                let tournament = self.scoped(*tournament_id)?;
                apply_to(&mut tournament.qualifiers, change, qualifier, |a, b| {
                    a.guid == b.guid
                })
            }
            EventTarget::Tournament { tournament } => {
                apply_to(&mut self.tournaments, change, tournament, |a, b| {
                    a.guid == b.guid
                })
            }
            EventTarget::Server { server } => {
                // CoreServer equality ignores the descriptive fields, so an
                // update that only renames must compare those explicitly.
                let index = self.known_servers.iter().position(|s| s.same_host(server));
                match (change, index) {
                    (Change::Updated, Some(index)) => {
                        let current = &mut self.known_servers[index];
                        let renamed = current.name != server.name
                            || current.websocket_port != server.websocket_port;
                        if renamed {
                            *current = server.clone();
                        }
                        renamed
                    }
                    _ => apply_to(&mut self.known_servers, change, server, |a, b| {
                        a.same_host(b)
                    }),
                }
            }
        };
        Ok(changed)
    }

    fn scoped(&mut self, tournament_id: Uuid) -> Result<&mut crate::Tournament, ReplicationError> {
        self.tournament_mut(tournament_id)
            .ok_or(ReplicationError::UnknownTournament(tournament_id))
    }
}

/// What observing a packet did to a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorChange {
    /// A Connect response replaced the whole state.
    Replaced,
    /// An event was applied; `true` when it changed anything.
    Applied(bool),
    /// The packet carries nothing for the mirror.
    Ignored,
}

/// Client-side copy of a host's State.
#[derive(Debug, Clone, Default)]
pub struct StateMirror {
    state: State,
    synced: bool,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Whether a Connect response has been received.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Feed one packet received from the host.
    pub fn observe(&mut self, packet: &Packet) -> Result<MirrorChange, ReplicationError> {
        match &packet.payload {
            Payload::Response(response) if response.is_success() => match &response.details {
                ResponseDetails::Connect { state, .. } => {
                    self.state = state.clone();
                    self.synced = true;
                    Ok(MirrorChange::Replaced)
                }
                ResponseDetails::Generic { .. } => Ok(MirrorChange::Ignored),
            },
            Payload::Event(event) => self.state.apply(event).map(MirrorChange::Applied),
            _ => Ok(MirrorChange::Ignored),
        }
    }
}
