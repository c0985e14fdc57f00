//! Fixtures shared by the gateway's unit tests.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::GatewayEvent;
use parley_types::models::{Conversation, Identity, Role};

use crate::config::ChatConfig;
use crate::registry::{Outbound, Registration};
use crate::service::ChatService;

pub struct Fixture {
    pub service: ChatService,
    pub tenant_id: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(ChatConfig::default())
    }

    pub fn with_config(config: ChatConfig) -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let service = ChatService::new(Arc::new(db), config).expect("service");
        Self {
            service,
            tenant_id: Uuid::new_v4(),
        }
    }

    /// A user of this fixture's tenant, already present in the directory.
    pub async fn user(&self, role: Role, username: &str) -> Identity {
        self.user_in(self.tenant_id, role, username).await
    }

    pub async fn user_in(&self, tenant_id: Uuid, role: Role, username: &str) -> Identity {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            tenant_id,
            role,
            username: username.to_string(),
        };
        self.service.touch_identity(&identity).await.expect("touch identity");
        identity
    }

    pub async fn direct(&self, creator: &Identity, other: &Identity) -> Conversation {
        self.service
            .create_conversation(creator, vec![other.user_id], None, false)
            .await
            .expect("direct conversation")
    }

    /// Connect and swallow the `connection_established` greeting.
    pub async fn connect(&self, identity: &Identity) -> Registration {
        let mut registration = self.service.connect(identity).await.expect("connect");
        let greeting = drain(&mut registration.outbound);
        assert!(
            matches!(greeting.first(), Some(GatewayEvent::ConnectionEstablished { .. })),
            "expected a greeting, got {:?}",
            greeting
        );
        registration
    }
}

/// Everything queued for a connection so far, pings skipped.
pub fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Event(event) = outbound {
            events.push(event);
        }
    }
    events
}

pub fn kinds(events: &[GatewayEvent]) -> Vec<&'static str> {
    events.iter().map(GatewayEvent::kind).collect()
}
