use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use algonotes_auth::SessionAuthenticator;
use algonotes_types::error::{CoreResult, ValidationError};
use algonotes_types::events::GatewayEvent;
use algonotes_types::models::{ChatMessage, Identity};

/// Messages retained for peers that join later.
pub const HISTORY_CAPACITY: usize = 50;

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Per-connection outbound queue. A peer that falls this far behind is
/// disconnected instead of buffering without bound.
const OUTBOUND_CAPACITY: usize = 256;

/// Lifecycle of a joined connection. A refused token never gets this far:
/// `join` returns the error and no connection exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Token accepted and registered; events queue up until the transport
    /// has sent `Ready` and calls [`ConnectionHandle::activate`].
    Connecting,
    /// Receives events and may publish.
    Active,
    /// Left, disconnected, or dropped for falling behind.
    Closed,
}

/// The global chat: live connections plus the retained history.
///
/// All joins, publishes and leaves go through one mutex, which gives every
/// peer the same total order of messages. The lock is never held across an
/// await; fan-out only does non-blocking `try_send`.
#[derive(Clone)]
pub struct ChatHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    auth: Arc<SessionAuthenticator>,
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    next_conn_id: u64,
    connections: HashMap<u64, Peer>,
    history: VecDeque<ChatMessage>,
}

struct Peer {
    identity: Identity,
    tx: mpsc::Sender<GatewayEvent>,
    state: ConnectionState,
}

/// Result of a successful `join`.
pub struct Joined {
    pub handle: ConnectionHandle,
    /// Retained messages at join time, oldest first.
    pub history: Vec<ChatMessage>,
    /// Users online at join time, this one included.
    pub online: Vec<Identity>,
    /// Every event fanned out after the join. Yields `None` once the
    /// connection is closed and the queue is drained.
    pub inbox: mpsc::Receiver<GatewayEvent>,
}

/// Membership token for one connection. Dropping it leaves the hub.
pub struct ConnectionHandle {
    id: u64,
    identity: Identity,
    hub: ChatHub,
}

impl ConnectionHandle {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.hub.state_of(self.id)
    }

    /// Move from `Connecting` to `Active`. Returns `false` if the connection
    /// was closed in the meantime.
    pub fn activate(&self) -> bool {
        self.hub.activate(self)
    }

    pub fn leave(&self) {
        self.hub.leave(self);
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}

impl ChatHub {
    pub fn new(auth: Arc<SessionAuthenticator>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                auth,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    /// Verify `token` and register a new connection. Blocks on the user
    /// lookup done by the authenticator.
    pub fn join(&self, token: &str) -> CoreResult<Joined> {
        let identity = self.inner.auth.verify(token).map_err(|e| {
            warn!("Chat join rejected: {}", e);
            e
        })?;
        Ok(self.admit(identity))
    }

    /// Register a connection for an identity that was already verified. It
    /// starts out `Connecting`.
    pub fn admit(&self, identity: Identity) -> Joined {
        let (tx, inbox) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut state = self.lock();

        let id = state.next_conn_id;
        state.next_conn_id += 1;

        let first_connection = !state.is_online(identity.user_id);
        if first_connection {
            state.deliver(GatewayEvent::PresenceUpdate {
                user_id: identity.user_id,
                handle: identity.handle.clone(),
                online: true,
            });
        }

        state.connections.insert(
            id,
            Peer {
                identity: identity.clone(),
                tx,
                state: ConnectionState::Connecting,
            },
        );

        let history = state.history.iter().cloned().collect();
        let online = state.online();
        drop(state);

        info!("{} ({}) joined chat as connection {}", identity.handle, identity.user_id, id);

        Joined {
            handle: ConnectionHandle {
                id,
                identity,
                hub: self.clone(),
            },
            history,
            online,
            inbox,
        }
    }

    /// Append a message to the history and deliver it to every registered
    /// connection, the publisher included. `Connecting` peers get it queued.
    ///
    /// Returns `Ok(None)` when the publisher's connection is not `Active`;
    /// the message is then dropped without error.
    pub fn publish(&self, handle: &ConnectionHandle, text: &str) -> CoreResult<Option<ChatMessage>> {
        validate_text(text)?;

        let mut state = self.lock();
        let publisher = state.connections.get(&handle.id).map(|p| p.state);
        if publisher != Some(ConnectionState::Active) {
            debug!("Dropping message from connection {} ({:?})", handle.id, publisher);
            return Ok(None);
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            author_id: handle.identity.user_id,
            author_handle: handle.identity.handle.clone(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };

        state.history.push_back(message.clone());
        while state.history.len() > HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.deliver(GatewayEvent::ChatMessage(message.clone()));

        Ok(Some(message))
    }

    /// Send an event to a single connection, e.g. a refusal of its own
    /// command. Silently ignored if the connection is gone.
    pub fn notify(&self, handle: &ConnectionHandle, event: GatewayEvent) {
        let mut state = self.lock();
        let full = match state.connections.get(&handle.id) {
            Some(peer) => peer.tx.try_send(event).is_err(),
            None => false,
        };
        if full {
            state.drop_peers(vec![handle.id]);
        }
    }

    /// Idempotent.
    pub fn leave(&self, handle: &ConnectionHandle) {
        self.remove(handle.id);
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn online(&self) -> Vec<Identity> {
        self.lock().online()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn activate(&self, handle: &ConnectionHandle) -> bool {
        match self.lock().connections.get_mut(&handle.id) {
            Some(peer) => {
                peer.state = ConnectionState::Active;
                true
            }
            None => false,
        }
    }

    fn state_of(&self, id: u64) -> ConnectionState {
        self.lock()
            .connections
            .get(&id)
            .map_or(ConnectionState::Closed, |peer| peer.state)
    }

    fn remove(&self, id: u64) {
        let mut state = self.lock();
        if state.connections.contains_key(&id) {
            state.drop_peers(vec![id]);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            error!("Chat hub lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

impl HubState {
    fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.values().any(|p| p.identity.user_id == user_id)
    }

    fn online(&self) -> Vec<Identity> {
        let mut seen: HashMap<Uuid, Identity> = HashMap::new();
        for peer in self.connections.values() {
            seen.entry(peer.identity.user_id)
                .or_insert_with(|| peer.identity.clone());
        }
        seen.into_values().collect()
    }

    /// Fan an event out to every connection. Peers whose queue is full or
    /// whose receiver is gone are removed, which may produce presence events
    /// of its own; those are delivered in turn.
    fn deliver(&mut self, event: GatewayEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let mut dropped = Vec::new();
            for (&id, peer) in &self.connections {
                match peer.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("{} (connection {}) fell behind; disconnecting", peer.identity.handle, id);
                        dropped.push(id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(id),
                }
            }
            pending.extend(self.detach(dropped));
        }
    }

    fn drop_peers(&mut self, ids: Vec<u64>) {
        for event in self.detach(ids) {
            self.deliver(event);
        }
    }

    /// Remove connections and return the presence events their removal
    /// implies, without delivering them.
    fn detach(&mut self, ids: Vec<u64>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        for id in ids {
            let Some(peer) = self.connections.remove(&id) else {
                continue;
            };
            info!("{} ({}) left chat (connection {})", peer.identity.handle, peer.identity.user_id, id);
            if !self.is_online(peer.identity.user_id) {
                events.push(GatewayEvent::PresenceUpdate {
                    user_id: peer.identity.user_id,
                    handle: peer.identity.handle,
                    online: false,
                });
            }
        }
        events
    }
}

fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ValidationError::MessageTooLong {
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(())
}
