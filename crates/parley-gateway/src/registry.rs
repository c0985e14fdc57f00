use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::{Identity, Role};

use crate::error::ChatError;

/// What the registry pushes down a connection's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(GatewayEvent),
    /// Liveness probe; the connection turns it into a WebSocket Ping frame.
    Ping,
}

/// Handed to the connection task that owns the socket.
pub struct Registration {
    pub conn_id: Uuid,
    pub outbound: mpsc::Receiver<Outbound>,
    /// Cancelled when the registry drops this connection (superseded,
    /// evicted by heartbeat, or overflowed its outbound queue).
    pub closed: CancellationToken,
    /// The connection this one replaced. Its typing flags still have to be
    /// cleared for peers; the user never went offline.
    pub superseded: Option<Departed>,
}

/// A connection that has left the registry. Whoever removed it is
/// responsible for announcing the departure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub user_id: Uuid,
    pub conn_id: Uuid,
    pub tenant_id: Uuid,
    /// Conversations the user was typing in at the time
    pub typing: Vec<Uuid>,
}

/// Outcome of pushing one event at one user.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No live connection; the persisted record is all the user gets.
    Offline,
    /// The connection could not keep up (or was already gone) and has been
    /// removed from the registry.
    Evicted(Departed),
}

/// Read-only view of a registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
}

struct Session {
    conn_id: Uuid,
    tenant_id: Uuid,
    role: Role,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
    /// Set when a ping goes out, cleared by the matching pong.
    awaiting_pong: AtomicBool,
    typing: Mutex<HashSet<Uuid>>,
}

impl Session {
    fn depart(&self, user_id: Uuid) -> Departed {
        self.closed.cancel();
        let typing = self
            .typing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        Departed {
            user_id,
            conn_id: self.conn_id,
            tenant_id: self.tenant_id,
            typing,
        }
    }
}

/// Which session of a user a push may land on.
#[derive(Debug, Clone, Copy)]
enum Target {
    Tenant(Uuid),
    Connection(Uuid),
}

impl Target {
    fn matches(self, session: &Session) -> bool {
        match self {
            Self::Tenant(tenant_id) => session.tenant_id == tenant_id,
            Self::Connection(conn_id) => session.conn_id == conn_id,
        }
    }
}

/// Which authenticated user currently has a live channel, and which one.
/// At most one connection per user: a new registration supersedes and closes
/// the previous one.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    outbound_buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                outbound_buffer: outbound_buffer.max(1),
            }),
        }
    }

    /// Register a connection for `identity`, closing any previous one. A live
    /// session held under another tenant is never replaced.
    pub async fn register(&self, identity: &Identity) -> Result<Registration, ChatError> {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.outbound_buffer);
        let closed = CancellationToken::new();

        let session = Arc::new(Session {
            conn_id,
            tenant_id: identity.tenant_id,
            role: identity.role,
            tx,
            closed: closed.clone(),
            awaiting_pong: AtomicBool::new(false),
            typing: Mutex::new(HashSet::new()),
        });

        let previous = {
            let mut sessions = self.inner.sessions.write().await;
            if let Some(current) = sessions.get(&identity.user_id) {
                if current.tenant_id != identity.tenant_id {
                    warn!(
                        "{} ({}) tried to connect under tenant {} while live under {}",
                        identity.username, identity.user_id, identity.tenant_id, current.tenant_id
                    );
                    return Err(ChatError::AuthFailure);
                }
            }
            sessions.insert(identity.user_id, session)
        };

        let superseded = previous.map(|previous| {
            info!(
                "{} ({}) reconnected, closing superseded connection {}",
                identity.username, identity.user_id, previous.conn_id
            );
            previous.depart(identity.user_id)
        });

        Ok(Registration {
            conn_id,
            outbound: rx,
            closed,
            superseded,
        })
    }

    /// Remove whatever connection the user has. Idempotent.
    pub async fn unregister(&self, user_id: Uuid) -> Option<Departed> {
        let removed = self.inner.sessions.write().await.remove(&user_id);
        removed.map(|session| session.depart(user_id))
    }

    /// Remove the user's entry only if it still belongs to `conn_id`, so a
    /// superseded connection shutting down cannot unregister its successor.
    pub async fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) -> Option<Departed> {
        let mut sessions = self.inner.sessions.write().await;
        let owned = sessions
            .get(&user_id)
            .is_some_and(|session| session.conn_id == conn_id);
        if !owned {
            return None;
        }
        sessions
            .remove(&user_id)
            .map(|session| session.depart(user_id))
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner
            .sessions
            .read()
            .await
            .get(&user_id)
            .map(|session| ConnectionHandle {
                conn_id: session.conn_id,
                tenant_id: session.tenant_id,
                role: session.role,
            })
    }

    /// Subset of `user_ids` with a live connection in `tenant_id`.
    pub async fn online_among(&self, tenant_id: Uuid, user_ids: &[Uuid]) -> Vec<Uuid> {
        let sessions = self.inner.sessions.read().await;
        user_ids
            .iter()
            .copied()
            .filter(|id| sessions.get(id).is_some_and(|s| s.tenant_id == tenant_id))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Fire-and-forget push to the user's current connection in `tenant_id`.
    /// Never waits on a slow consumer: a full queue evicts the connection
    /// instead.
    pub async fn send(&self, tenant_id: Uuid, user_id: Uuid, event: GatewayEvent) -> Delivery {
        self.push(user_id, Target::Tenant(tenant_id), Outbound::Event(event)).await
    }

    /// Like `send`, but only if the user's connection is still `conn_id`.
    /// Used for replies (acks, errors) to the connection that asked.
    pub async fn send_to_connection(&self, user_id: Uuid, conn_id: Uuid, event: GatewayEvent) -> Delivery {
        self.push(user_id, Target::Connection(conn_id), Outbound::Event(event)).await
    }

    async fn push(&self, user_id: Uuid, target: Target, outbound: Outbound) -> Delivery {
        let session = {
            let sessions = self.inner.sessions.read().await;
            match sessions.get(&user_id) {
                Some(session) if target.matches(session) => session.clone(),
                _ => return Delivery::Offline,
            }
        };

        match session.tx.try_send(outbound) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for {} (conn {}), disconnecting",
                    user_id, session.conn_id
                );
                self.evict(user_id, session.conn_id).await
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Connection {} of {} already closed", session.conn_id, user_id);
                self.evict(user_id, session.conn_id).await
            }
        }
    }

    async fn evict(&self, user_id: Uuid, conn_id: Uuid) -> Delivery {
        match self.unregister_connection(user_id, conn_id).await {
            Some(departed) => Delivery::Evicted(departed),
            // Someone else removed or replaced it in the meantime.
            None => Delivery::Offline,
        }
    }

    /// Record a pong from `conn_id`.
    pub async fn mark_alive(&self, user_id: Uuid, conn_id: Uuid) {
        if let Some(session) = self.inner.sessions.read().await.get(&user_id) {
            if session.conn_id == conn_id {
                session.awaiting_pong.store(false, Ordering::Release);
            }
        }
    }

    /// One heartbeat round. A connection that has not answered the previous
    /// ping is removed; every other connection gets a fresh ping.
    pub async fn heartbeat_tick(&self) -> Vec<Departed> {
        let mut sessions = self.inner.sessions.write().await;

        let dead: Vec<Uuid> = sessions
            .iter()
            .filter_map(|(user_id, session)| {
                if session.awaiting_pong.swap(true, Ordering::AcqRel) {
                    return Some(*user_id);
                }
                match session.tx.try_send(Outbound::Ping) {
                    Ok(()) => None,
                    Err(_) => Some(*user_id),
                }
            })
            .collect();

        dead.into_iter()
            .filter_map(|user_id| {
                sessions
                    .remove(&user_id)
                    .map(|session| session.depart(user_id))
            })
            .collect()
    }

    /// Track the connection-scoped typing flag. Returns false if the user
    /// has no live connection `conn_id`.
    pub async fn set_typing(&self, user_id: Uuid, conn_id: Uuid, conversation_id: Uuid, typing: bool) -> bool {
        let sessions = self.inner.sessions.read().await;
        let Some(session) = sessions.get(&user_id).filter(|s| s.conn_id == conn_id) else {
            return false;
        };

        let mut flags = session.typing.lock().unwrap_or_else(PoisonError::into_inner);
        if typing {
            flags.insert(conversation_id);
        } else {
            flags.remove(&conversation_id);
        }
        true
    }
}
