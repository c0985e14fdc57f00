use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::{DeliveryStatus, Identity, PresenceStatus};

use crate::error::ChatError;
use crate::registry::{Delivery, Departed, Registration};
use crate::service::ChatService;

impl ChatService {
    // -- Connection lifecycle --

    /// Register a verified identity, greet the new connection with the
    /// co-participants already online, then announce it to them. Replacing a
    /// live connection only clears what the old one was typing; peers never
    /// saw the user leave.
    pub async fn connect(&self, identity: &Identity) -> Result<Registration, ChatError> {
        self.touch_identity(identity).await?;

        let mut registration = self.registry().register(identity).await?;
        let superseded = registration.superseded.take();

        let (tenant_id, user_id) = (identity.tenant_id, identity.user_id);
        let peers = match self.db(move |db| db.co_participants(tenant_id, user_id)).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Presence lookup for {} failed: {}", user_id, e);
                vec![]
            }
        };
        let online_user_ids = self.registry().online_among(tenant_id, &peers).await;

        let greeting = GatewayEvent::ConnectionEstablished {
            user_id,
            tenant_id,
            online_user_ids,
        };
        if let Delivery::Evicted(departed) = self
            .registry()
            .send_to_connection(user_id, registration.conn_id, greeting)
            .await
        {
            self.announce_departures(superseded.into_iter().chain([departed]).collect())
                .await;
            return Ok(registration);
        }

        info!(
            "{} ({}) connected as {} (conn {})",
            identity.username, user_id, identity.role, registration.conn_id
        );
        match superseded {
            Some(previous) => self.announce_departures(vec![previous]).await,
            None => {
                self.broadcast_presence(user_id, tenant_id, PresenceStatus::Online)
                    .await
            }
        }
        Ok(registration)
    }

    /// Tear down `conn_id`. A connection that was already superseded or
    /// evicted leaves no trace here; whoever removed it announced it.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        if let Some(departed) = self.registry().unregister_connection(user_id, conn_id).await {
            info!("{} disconnected (conn {})", user_id, conn_id);
            self.announce_departures(vec![departed]).await;
        }
    }

    /// Tell co-participants about connections that left the registry: typing
    /// indicators are cleared and the user is shown offline unless they have
    /// already reconnected. Further evictions discovered while announcing are
    /// announced in turn.
    pub(crate) async fn announce_departures(&self, departed: Vec<Departed>) {
        let mut pending = departed;

        while let Some(gone) = pending.pop() {
            for conversation_id in &gone.typing {
                let (tenant_id, conversation_id) = (gone.tenant_id, *conversation_id);
                let members = match self
                    .db(move |db| db.participant_ids(tenant_id, conversation_id))
                    .await
                {
                    Ok(members) => members,
                    Err(e) => {
                        warn!("Typing cleanup for {} skipped: {}", conversation_id, e);
                        continue;
                    }
                };
                let others: Vec<Uuid> = members.into_iter().filter(|id| *id != gone.user_id).collect();
                let (_, evicted) = self
                    .notify(
                        gone.tenant_id,
                        &others,
                        GatewayEvent::UserStoppedTyping {
                            conversation_id,
                            user_id: gone.user_id,
                        },
                    )
                    .await;
                pending.extend(evicted);
            }

            if self.registry().lookup(gone.user_id).await.is_some() {
                debug!("{} already reconnected, not announcing offline", gone.user_id);
                continue;
            }
            let evicted = self
                .presence_fanout(gone.user_id, gone.tenant_id, PresenceStatus::Offline)
                .await;
            pending.extend(evicted);
        }
    }

    // -- Presence --

    /// Tell every registered user sharing a conversation with `user_id` about
    /// a presence change. Best effort: nothing is persisted or retried.
    pub async fn broadcast_presence(&self, user_id: Uuid, tenant_id: Uuid, status: PresenceStatus) {
        let evicted = self.presence_fanout(user_id, tenant_id, status).await;
        self.announce_departures(evicted).await;
    }

    async fn presence_fanout(&self, user_id: Uuid, tenant_id: Uuid, status: PresenceStatus) -> Vec<Departed> {
        let peers = match self.db(move |db| db.co_participants(tenant_id, user_id)).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Presence broadcast for {} skipped: {}", user_id, e);
                return vec![];
            }
        };
        let online = self.registry().online_among(tenant_id, &peers).await;
        if online.is_empty() {
            return vec![];
        }

        let (delivered, evicted) = self
            .notify(tenant_id, &online, GatewayEvent::UserStatusChanged { user_id, status })
            .await;
        debug!(
            "Presence {:?} of {} sent to {} peer(s)",
            status,
            user_id,
            delivered.len()
        );
        evicted
    }

    // -- Typing --

    pub async fn typing_start(&self, who: &Identity, conn_id: Uuid, conversation_id: Uuid) -> Result<(), ChatError> {
        self.set_typing(who, conn_id, conversation_id, true).await
    }

    pub async fn typing_stop(&self, who: &Identity, conn_id: Uuid, conversation_id: Uuid) -> Result<(), ChatError> {
        self.set_typing(who, conn_id, conversation_id, false).await
    }

    async fn set_typing(&self, who: &Identity, conn_id: Uuid, conversation_id: Uuid, typing: bool) -> Result<(), ChatError> {
        let members = self.participants_for(who, conversation_id).await?;

        // The flag lives with the connection; no connection, nothing to show.
        if !self
            .registry()
            .set_typing(who.user_id, conn_id, conversation_id, typing)
            .await
        {
            return Ok(());
        }

        let others: Vec<Uuid> = members.into_iter().filter(|id| *id != who.user_id).collect();
        let online = self.registry().online_among(who.tenant_id, &others).await;
        let event = if typing {
            GatewayEvent::UserTyping {
                conversation_id,
                user_id: who.user_id,
                username: who.username.clone(),
            }
        } else {
            GatewayEvent::UserStoppedTyping {
                conversation_id,
                user_id: who.user_id,
            }
        };

        let (_, evicted) = self.notify(who.tenant_id, &online, event).await;
        self.announce_departures(evicted).await;
        Ok(())
    }

    // -- Read receipts --

    /// Mark a message read on behalf of a participant. Returns whether this
    /// call flipped the flag; only that call notifies the sender. Reading
    /// one's own message changes nothing.
    pub async fn mark_read(&self, reader: &Identity, message_id: Uuid) -> Result<bool, ChatError> {
        let tenant_id = reader.tenant_id;
        let message = self
            .db(move |db| db.get_message(tenant_id, message_id))
            .await?
            .ok_or(ChatError::NotFound)?;

        self.participants_for(reader, message.conversation_id).await?;

        if message.sender_id == reader.user_id {
            return Ok(false);
        }
        // Not released yet, so the reader cannot have seen it.
        if message.delivery_status == DeliveryStatus::Scheduled {
            return Err(ChatError::NotFound);
        }

        let flipped = self.db(move |db| db.mark_read(tenant_id, message_id)).await?;
        if !flipped {
            return Ok(false);
        }

        let receipt = GatewayEvent::MessageRead {
            message_id,
            conversation_id: message.conversation_id,
            reader_id: reader.user_id,
            read_at: Utc::now(),
        };
        match self.registry().send(tenant_id, message.sender_id, receipt).await {
            Delivery::Delivered => {}
            Delivery::Offline => debug!("Read receipt for {} dropped, sender offline", message_id),
            Delivery::Evicted(departed) => self.announce_departures(vec![departed]).await,
        }
        Ok(true)
    }
}
