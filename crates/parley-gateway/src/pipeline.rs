use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::queries::{NewAttachment, NewConversation, NewMessage};
use parley_types::api::ConversationSummary;
use parley_types::events::GatewayEvent;
use parley_types::models::{
    Attachment, AttachmentRef, ChatPermission, Conversation, DeliveryMode, DeliveryStatus, Grant,
    Identity, Message, Role,
};

use crate::error::ChatError;
use crate::registry::{Delivery, Departed};
use crate::schedule::{ResolvedDelivery, resolve_delivery};
use crate::service::ChatService;

const MAX_CONVERSATION_NAME: usize = 100;
const MAX_FILENAME: usize = 255;

impl ChatService {
    // -- Conversations --

    /// Create a direct or group conversation. Every listed participant must be
    /// reachable from the creator's role; otherwise nothing is written. A
    /// direct conversation that already exists for the pair is returned as is.
    pub async fn create_conversation(
        &self,
        creator: &Identity,
        participant_ids: Vec<Uuid>,
        name: Option<String>,
        is_group: bool,
    ) -> Result<Conversation, ChatError> {
        let others: Vec<Uuid> = participant_ids
            .into_iter()
            .filter(|id| *id != creator.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if others.is_empty() {
            return Err(ChatError::InvalidRequest(
                "a conversation needs at least one other participant".into(),
            ));
        }
        if !is_group && others.len() != 1 {
            return Err(ChatError::InvalidRequest(
                "a direct conversation has exactly two participants".into(),
            ));
        }

        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if name.as_ref().is_some_and(|n| n.chars().count() > MAX_CONVERSATION_NAME) {
            return Err(ChatError::InvalidRequest("conversation name is too long".into()));
        }

        let tenant_id = creator.tenant_id;
        let lookup = others.clone();
        let directory = self
            .db(move |db| db.get_users(tenant_id, &lookup))
            .await?;

        // Unknown ids and ids from another tenant are indistinguishable.
        if directory.len() != others.len() {
            return Err(ChatError::NotFound);
        }

        for user in &directory {
            let role = user.role()?;
            if !self.permissions().can_send(tenant_id, creator.role, role) {
                return Err(ChatError::PermissionDenied(format!(
                    "{} may not start a conversation with {} {}",
                    creator.role,
                    role,
                    user.user_id()?
                )));
            }
        }

        self.touch_identity(creator).await?;

        let creator_id = creator.user_id;
        let mut members = vec![creator.user_id];
        members.extend(others.iter().copied());
        let name_for_insert = name.clone();

        let conversation = self
            .db(move |db| {
                let now = Utc::now();
                let (id, created) = db.create_conversation(&NewConversation {
                    id: Uuid::new_v4(),
                    tenant_id,
                    is_group,
                    name: name_for_insert.as_deref(),
                    created_by: creator_id,
                    created_at: now,
                    participant_ids: &members,
                })?;
                if !created {
                    debug!("Reusing direct conversation {}", id);
                }
                db.get_conversation(tenant_id, id)?
                    .ok_or_else(|| anyhow::anyhow!("conversation {} vanished after insert", id))
            })
            .await?;

        info!(
            "{} ({}) opened conversation {} with {} participant(s)",
            creator.username,
            creator.user_id,
            conversation.id,
            conversation.participant_ids.len()
        );
        Ok(conversation)
    }

    pub async fn list_conversations(&self, viewer: &Identity) -> Result<Vec<ConversationSummary>, ChatError> {
        let (tenant_id, user_id) = (viewer.tenant_id, viewer.user_id);
        let rows = self
            .db(move |db| db.conversations_for_user(tenant_id, user_id))
            .await?;

        Ok(rows
            .into_iter()
            .map(|(conversation, unread_count)| ConversationSummary {
                conversation,
                unread_count,
            })
            .collect())
    }

    /// Newest-first history page; the reconnect catch-up path for anything a
    /// client missed while offline.
    pub async fn conversation_history(
        &self,
        viewer: &Identity,
        conversation_id: Uuid,
        limit: Option<u32>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ChatError> {
        self.participants_for(viewer, conversation_id).await?;

        let limit = limit.unwrap_or(50).clamp(1, self.config().max_history_page);
        let (tenant_id, user_id) = (viewer.tenant_id, viewer.user_id);
        self.db(move |db| db.message_history(tenant_id, conversation_id, user_id, limit, before))
            .await
    }

    /// Members of a conversation the caller belongs to.
    pub(crate) async fn participants_for(&self, who: &Identity, conversation_id: Uuid) -> Result<Vec<Uuid>, ChatError> {
        let tenant_id = who.tenant_id;
        let members = self
            .db(move |db| db.participant_ids(tenant_id, conversation_id))
            .await?;

        // Conversations always have members, so none means absent (or foreign).
        if members.is_empty() {
            return Err(ChatError::NotFound);
        }
        if !members.contains(&who.user_id) {
            return Err(ChatError::NotAParticipant);
        }
        Ok(members)
    }

    // -- Messages --

    /// Validate, persist and either fan out or park a message.
    ///
    /// The permission matrix is consulted against every other participant's
    /// current role on every send. Scheduled messages are left for the
    /// sweeper; immediate ones are pushed to every registered recipient.
    pub async fn send_message(
        &self,
        sender: &Identity,
        conversation_id: Uuid,
        content: String,
        attachments: Vec<AttachmentRef>,
        mode: DeliveryMode,
    ) -> Result<Message, ChatError> {
        self.validate_message(&content, &attachments)?;

        let tenant_id = sender.tenant_id;
        let roles = self
            .db(move |db| db.participant_roles(tenant_id, conversation_id))
            .await?;

        if roles.is_empty() {
            return Err(ChatError::NotFound);
        }
        if !roles.iter().any(|(id, _)| *id == sender.user_id) {
            return Err(ChatError::NotAParticipant);
        }

        let mut recipients = Vec::with_capacity(roles.len());
        for (user_id, role) in roles {
            if user_id == sender.user_id {
                continue;
            }
            match role {
                Some(role) if self.permissions().can_send(tenant_id, sender.role, role) => {
                    recipients.push(user_id);
                }
                Some(role) => {
                    return Err(ChatError::PermissionDenied(format!(
                        "{} may not message {}",
                        sender.role, role
                    )));
                }
                None => {
                    return Err(ChatError::PermissionDenied(format!(
                        "participant {} has no role in this tenant",
                        user_id
                    )));
                }
            }
        }

        let now = Utc::now();
        let resolved = resolve_delivery(mode, now, self.config());
        let scheduled_delivery = resolved.scheduled_for();
        let delivery_status = match resolved {
            ResolvedDelivery::Now => DeliveryStatus::Pending,
            ResolvedDelivery::At(_) => DeliveryStatus::Scheduled,
        };

        let message_id = Uuid::new_v4();
        let attachments: Vec<Attachment> = attachments
            .into_iter()
            .map(|reference| Attachment {
                id: Uuid::new_v4(),
                message_id,
                file_ref: reference.file_ref,
                original_filename: reference.original_filename,
                size: reference.size,
                mime_type: reference.mime_type,
            })
            .collect();

        let mut message = Message {
            id: message_id,
            conversation_id,
            sender_id: sender.user_id,
            tenant_id,
            content,
            created_at: now,
            is_read: false,
            scheduled_delivery,
            delivery_status,
            attachments,
        };

        let record = message.clone();
        self.db(move |db| {
            let references: Vec<AttachmentRef> = record
                .attachments
                .iter()
                .map(|a| AttachmentRef {
                    file_ref: a.file_ref.clone(),
                    original_filename: a.original_filename.clone(),
                    size: a.size,
                    mime_type: a.mime_type.clone(),
                })
                .collect();
            let new_attachments: Vec<NewAttachment<'_>> = record
                .attachments
                .iter()
                .zip(&references)
                .map(|(a, reference)| NewAttachment { id: a.id, reference })
                .collect();

            db.insert_message(
                &NewMessage {
                    id: record.id,
                    conversation_id: record.conversation_id,
                    sender_id: record.sender_id,
                    tenant_id: record.tenant_id,
                    content: &record.content,
                    created_at: record.created_at,
                    scheduled_delivery: record.scheduled_delivery,
                    delivery_status: record.delivery_status,
                },
                &new_attachments,
            )
        })
        .await?;

        match resolved {
            ResolvedDelivery::Now => {
                // The message is persisted; from here on failures only cost
                // live delivery, never the message itself.
                match self
                    .db(move |db| db.mark_message_delivered(tenant_id, message_id))
                    .await
                {
                    Ok(_) => message.delivery_status = DeliveryStatus::Delivered,
                    Err(e) => warn!("Message {} left pending: {}", message_id, e),
                }
                let delivered = self.fan_out(&message, &recipients).await;
                debug!(
                    "Message {} in {} delivered live to {}/{} recipient(s)",
                    message_id,
                    conversation_id,
                    delivered.len(),
                    recipients.len()
                );
            }
            ResolvedDelivery::At(at) => {
                info!(
                    "Message {} in {} scheduled for {}",
                    message_id, conversation_id, at
                );
            }
        }

        Ok(message)
    }

    fn validate_message(&self, content: &str, attachments: &[AttachmentRef]) -> Result<(), ChatError> {
        let config = self.config();

        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::InvalidRequest("message is empty".into()));
        }
        if content.chars().count() > config.max_content_len {
            return Err(ChatError::InvalidRequest(format!(
                "message exceeds {} characters",
                config.max_content_len
            )));
        }
        if attachments.len() > config.max_attachments {
            return Err(ChatError::InvalidRequest(format!(
                "at most {} attachments per message",
                config.max_attachments
            )));
        }
        for attachment in attachments {
            if attachment.file_ref.is_empty()
                || attachment.original_filename.is_empty()
                || attachment.original_filename.len() > MAX_FILENAME
                || attachment.mime_type.is_empty()
                || i64::try_from(attachment.size).is_err()
            {
                return Err(ChatError::InvalidRequest("malformed attachment reference".into()));
            }
        }
        Ok(())
    }

    /// Push a released message to every registered recipient and keep the
    /// per-recipient delivery trail. Returns the recipients reached live.
    pub(crate) async fn fan_out(&self, message: &Message, recipients: &[Uuid]) -> Vec<Uuid> {
        if recipients.is_empty() {
            return vec![];
        }

        let (tenant_id, message_id) = (message.tenant_id, message.id);
        let queued = recipients.to_vec();
        if let Err(e) = self
            .db(move |db| db.enqueue_deliveries(tenant_id, message_id, &queued, Utc::now()))
            .await
        {
            warn!("Delivery trail for {} not recorded: {}", message_id, e);
        }

        let (delivered, evicted) = self
            .notify(
                message.tenant_id,
                recipients,
                GatewayEvent::NewMessage {
                    message: message.clone(),
                },
            )
            .await;

        if !delivered.is_empty() {
            let reached = delivered.clone();
            if let Err(e) = self
                .db(move |db| db.mark_deliveries_delivered(message_id, &reached, Utc::now()))
                .await
            {
                warn!("Delivery trail for {} not updated: {}", message_id, e);
            }
        }

        self.announce_departures(evicted).await;
        delivered
    }

    /// Best-effort push of one event to several users. Offline users are
    /// skipped; connections that could not take the event are returned so the
    /// caller can announce them.
    pub(crate) async fn notify(
        &self,
        tenant_id: Uuid,
        recipients: &[Uuid],
        event: GatewayEvent,
    ) -> (Vec<Uuid>, Vec<Departed>) {
        let mut delivered = Vec::with_capacity(recipients.len());
        let mut evicted = Vec::new();

        for recipient in recipients {
            match self.registry().send(tenant_id, *recipient, event.clone()).await {
                Delivery::Delivered => delivered.push(*recipient),
                Delivery::Offline => {}
                Delivery::Evicted(departed) => {
                    warn!("Dropped {} for {}: connection evicted", event.kind(), recipient);
                    evicted.push(departed);
                }
            }
        }
        (delivered, evicted)
    }

    // -- Permissions --

    /// Override one cell of the tenant's permission matrix. Only tenant
    /// administrators may do this; the change applies to the next check.
    pub async fn set_permission(
        &self,
        actor: &Identity,
        from_role: Role,
        to_role: Role,
        grant: Grant,
    ) -> Result<ChatPermission, ChatError> {
        if !actor.role.administers_chat() {
            return Err(ChatError::PermissionDenied(format!(
                "{} may not change chat permissions",
                actor.role
            )));
        }

        let rule = ChatPermission {
            tenant_id: Some(actor.tenant_id),
            from_role,
            to_role,
            can_send: grant.can_send,
            can_receive: grant.can_receive,
        };
        let stored = rule.clone();
        self.db(move |db| db.upsert_permission(&stored)).await?;
        self.permissions().upsert(&rule);

        info!(
            "{} ({}) set {} -> {} to send={} receive={} in tenant {}",
            actor.username,
            actor.user_id,
            from_role,
            to_role,
            grant.can_send,
            grant.can_receive,
            actor.tenant_id
        );
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, drain, kinds};

    #[tokio::test]
    async fn permitted_pairs_can_converse() {
        let fx = Fixture::new();
        let alice = fx.user(Role::Employee, "alice").await;
        let boss = fx.user(Role::Manager, "boss").await;

        let conversation = fx.direct(&alice, &boss).await;
        assert!(!conversation.is_group);
        assert_eq!(conversation.participant_ids.len(), 2);

        let message = fx
            .service
            .send_message(&alice, conversation.id, "stand-up moved to 10".into(), vec![], DeliveryMode::Immediate)
            .await
            .unwrap();
        assert_eq!(message.delivery_status, DeliveryStatus::Delivered);
        assert_eq!(message.scheduled_delivery, None);
    }

    #[tokio::test]
    async fn every_role_pair_follows_the_matrix() {
        let fx = Fixture::new();
        let mut users = Vec::new();
        for role in Role::ALL {
            users.push(fx.user(role, role.as_str()).await);
        }

        for from in &users {
            for to in &users {
                if from.user_id == to.user_id {
                    continue;
                }
                let allowed = fx.service.permissions().can_send(fx.tenant_id, from.role, to.role);
                let result = fx
                    .service
                    .create_conversation(from, vec![to.user_id], Some("pair".into()), true)
                    .await;
                match (allowed, result) {
                    (true, Ok(_)) => {}
                    (false, Err(ChatError::PermissionDenied(_))) => {}
                    (allowed, other) => panic!(
                        "{} -> {} (allowed={}): unexpected {:?}",
                        from.role, to.role, allowed, other
                    ),
                }
            }
        }
    }

    #[tokio::test]
    async fn group_creation_is_all_or_nothing() {
        let fx = Fixture::new();
        let emp = fx.user(Role::Employee, "emp").await;
        let peer = fx.user(Role::Employee, "peer").await;
        let root = fx.user(Role::Root, "root").await;

        let err = fx
            .service
            .create_conversation(&emp, vec![peer.user_id, root.user_id], Some("all hands".into()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));

        assert!(fx.service.list_conversations(&peer).await.unwrap().is_empty());
        assert!(fx.service.list_conversations(&emp).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_conversations_are_not_duplicated() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;

        let first = fx.direct(&a, &b).await;
        let second = fx.direct(&b, &a).await;
        assert_eq!(first.id, second.id);
        assert_eq!(fx.service.list_conversations(&a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn direct_conversation_needs_exactly_one_other_member() {
        let fx = Fixture::new();
        let a = fx.user(Role::Manager, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let c = fx.user(Role::Employee, "c").await;

        let err = fx
            .service
            .create_conversation(&a, vec![b.user_id, c.user_id], None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        let err = fx
            .service
            .create_conversation(&a, vec![a.user_id], None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn cross_tenant_participants_are_rejected() {
        let fx = Fixture::new();
        let a = fx.user(Role::Admin, "a").await;
        let outsider = fx.user_in(Uuid::new_v4(), Role::Employee, "outsider").await;

        let err = fx
            .service
            .create_conversation(&a, vec![outsider.user_id], None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
    }

    #[tokio::test]
    async fn non_participants_can_neither_send_nor_read() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let admin = fx.user(Role::Root, "root").await;
        let conversation = fx.direct(&a, &b).await;

        let err = fx
            .service
            .send_message(&admin, conversation.id, "hi".into(), vec![], DeliveryMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));

        let err = fx
            .service
            .conversation_history(&admin, conversation.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));

        // Same conversation seen from another tenant simply does not exist.
        let foreign = fx.user_in(Uuid::new_v4(), Role::Root, "foreign").await;
        let err = fx
            .service
            .send_message(&foreign, conversation.id, "hi".into(), vec![], DeliveryMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
    }

    #[tokio::test]
    async fn send_rechecks_roles_changed_since_creation() {
        let fx = Fixture::new();
        let lead = fx.user(Role::TeamLead, "lead").await;
        let mut other = fx.user(Role::Manager, "other").await;
        let conversation = fx.direct(&lead, &other).await;

        // Promoted upstream: team leads may not message root.
        other.role = Role::Root;
        fx.service.touch_identity(&other).await.unwrap();

        let err = fx
            .service
            .send_message(&lead, conversation.id, "hello".into(), vec![], DeliveryMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));

        let history = fx
            .service
            .conversation_history(&other, conversation.id, None, None)
            .await
            .unwrap();
        assert!(history.is_empty(), "a rejected send must not persist anything");
    }

    #[tokio::test]
    async fn immediate_send_reaches_online_recipients_only() {
        let fx = Fixture::new();
        let a = fx.user(Role::Manager, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let c = fx.user(Role::Employee, "c").await;
        let group = fx
            .service
            .create_conversation(&a, vec![b.user_id, c.user_id], Some("ops".into()), true)
            .await
            .unwrap();

        let mut a_conn = fx.connect(&a).await;
        let mut b_conn = fx.connect(&b).await;
        drain(&mut a_conn.outbound);

        let message = fx
            .service
            .send_message(&a, group.id, "deploy at 5".into(), vec![], DeliveryMode::Immediate)
            .await
            .unwrap();

        let b_events = drain(&mut b_conn.outbound);
        assert_eq!(kinds(&b_events), vec!["new_message"]);
        assert!(drain(&mut a_conn.outbound).is_empty(), "sender gets no echo");

        let tenant = fx.tenant_id;
        let id = message.id;
        let trail = fx.service.db(move |db| db.delivery_queue(tenant, id)).await.unwrap();
        assert_eq!(trail.len(), 2);
        for row in trail {
            let expected = if row.recipient_id == b.user_id.to_string() {
                "delivered"
            } else {
                "pending"
            };
            assert_eq!(row.status, expected, "recipient {}", row.recipient_id);
        }
    }

    #[tokio::test]
    async fn deferred_send_is_persisted_but_not_broadcast() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let conversation = fx.direct(&a, &b).await;
        let mut b_conn = fx.connect(&b).await;

        let message = fx
            .service
            .send_message(&a, conversation.id, "lunch?".into(), vec![], DeliveryMode::BreakTime)
            .await
            .unwrap();

        assert_eq!(message.delivery_status, DeliveryStatus::Scheduled);
        assert!(message.scheduled_delivery.is_some_and(|at| at > message.created_at));
        assert!(drain(&mut b_conn.outbound).is_empty());

        let tenant = fx.tenant_id;
        let id = message.id;
        let trail = fx.service.db(move |db| db.delivery_queue(tenant, id)).await.unwrap();
        assert!(trail.is_empty(), "scheduled messages are not queued until released");

        let seen_by_b = fx.service.conversation_history(&b, conversation.id, None, None).await.unwrap();
        assert!(seen_by_b.is_empty());
        let seen_by_a = fx.service.conversation_history(&a, conversation.id, None, None).await.unwrap();
        assert_eq!(seen_by_a.len(), 1);
    }

    #[tokio::test]
    async fn attachments_travel_with_the_message() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let conversation = fx.direct(&a, &b).await;

        let attachment = AttachmentRef {
            file_ref: "uploads/9f2c".into(),
            original_filename: "shift-plan.xlsx".into(),
            size: 18_432,
            mime_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".into(),
        };
        fx.service
            .send_message(&a, conversation.id, String::new(), vec![attachment], DeliveryMode::Immediate)
            .await
            .unwrap();

        let history = fx.service.conversation_history(&b, conversation.id, None, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attachments.len(), 1);
        assert_eq!(history[0].attachments[0].original_filename, "shift-plan.xlsx");
    }

    #[tokio::test]
    async fn empty_and_oversized_messages_are_rejected() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let conversation = fx.direct(&a, &b).await;

        let err = fx
            .service
            .send_message(&a, conversation.id, "   ".into(), vec![], DeliveryMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        let long = "x".repeat(fx.service.config().max_content_len + 1);
        let err = fx
            .service
            .send_message(&a, conversation.id, long, vec![], DeliveryMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn attachment_size_beyond_storage_range_is_a_client_error() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let conversation = fx.direct(&a, &b).await;

        let huge = AttachmentRef {
            file_ref: "files/huge.bin".into(),
            original_filename: "huge.bin".into(),
            size: u64::MAX,
            mime_type: "application/octet-stream".into(),
        };
        let err = fx
            .service
            .send_message(&a, conversation.id, "backup".into(), vec![huge], DeliveryMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        let history = fx.service.conversation_history(&a, conversation.id, None, None).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn only_administrators_edit_the_matrix() {
        let fx = Fixture::new();
        let emp = fx.user(Role::Employee, "emp").await;
        let admin = fx.user(Role::Admin, "admin").await;
        let open = Grant {
            can_send: true,
            can_receive: true,
        };

        let err = fx
            .service
            .set_permission(&emp, Role::Employee, Role::Root, open)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
        assert!(!fx.service.permissions().can_send(fx.tenant_id, Role::Employee, Role::Root));

        fx.service
            .set_permission(&admin, Role::Employee, Role::Root, open)
            .await
            .unwrap();
        assert!(fx.service.permissions().can_send(fx.tenant_id, Role::Employee, Role::Root));
        // Other tenants keep the global default.
        assert!(!fx.service.permissions().can_send(Uuid::new_v4(), Role::Employee, Role::Root));
    }
}
