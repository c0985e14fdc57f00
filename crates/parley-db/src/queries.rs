use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parley_types::models::{
    Attachment, AttachmentRef, ChatPermission, Conversation, DeliveryStatus, Identity, Message,
    Role,
};
use rusqlite::Connection;
use rusqlite::types::ToSql;
use uuid::Uuid;

use crate::models::{
    AttachmentRow, ConversationRow, DeliveryQueueRow, MessageRow, PermissionRow, UserRow,
};
use crate::{Database, format_ts};

pub struct NewConversation<'a> {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub is_group: bool,
    pub name: Option<&'a str>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    /// Every member, creator included
    pub participant_ids: &'a [Uuid],
}

pub struct NewMessage<'a> {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub tenant_id: Uuid,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
    pub scheduled_delivery: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
}

pub struct NewAttachment<'a> {
    pub id: Uuid,
    pub reference: &'a AttachmentRef,
}

/// Order-independent key identifying the direct conversation between two users.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, tenant_id, content, created_at, \
     is_read, scheduled_delivery, delivery_status";

impl Database {
    // -- Users --

    /// Records the identity the auth layer vouched for, so role changes made
    /// upstream are visible to the next permission check. Returns false when
    /// the user id already belongs to another tenant; nothing is written then.
    pub fn upsert_user(&self, identity: &Identity, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT INTO users (id, tenant_id, role, username, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    role = excluded.role,
                    username = excluded.username,
                    updated_at = excluded.updated_at
                 WHERE users.tenant_id = excluded.tenant_id",
                rusqlite::params![
                    identity.user_id.to_string(),
                    identity.tenant_id.to_string(),
                    identity.role.as_str(),
                    identity.username,
                    format_ts(now),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Batch-fetch users of one tenant. Ids belonging to other tenants are
    /// simply absent from the result.
    pub fn get_users(&self, tenant_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<UserRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=user_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, tenant_id, role, username FROM users
                 WHERE tenant_id = ?1 AND id IN ({})",
                placeholders.join(", ")
            );

            let mut values = vec![tenant_id.to_string()];
            values.extend(user_ids.iter().map(Uuid::to_string));
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    /// Inserts a conversation and all of its members in one transaction.
    /// For direct conversations an existing one with the same pair wins:
    /// returns `(id, false)` with the id of that conversation.
    pub fn create_conversation(&self, new: &NewConversation<'_>) -> Result<(Uuid, bool)> {
        let key = match (new.is_group, new.participant_ids) {
            (false, [a, b]) => Some(direct_key(*a, *b)),
            _ => None,
        };
        let tenant = new.tenant_id.to_string();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO conversations (id, tenant_id, is_group, name, created_by, created_at, direct_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(tenant_id, direct_key) DO NOTHING",
                rusqlite::params![
                    new.id.to_string(),
                    tenant,
                    new.is_group,
                    new.name,
                    new.created_by.to_string(),
                    format_ts(new.created_at),
                    key,
                ],
            )?;

            if inserted == 0 {
                let existing: String = tx.query_row(
                    "SELECT id FROM conversations WHERE tenant_id = ?1 AND direct_key = ?2",
                    rusqlite::params![tenant, key],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                return Ok((existing.parse::<Uuid>()?, false));
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO conversation_participants (conversation_id, user_id, tenant_id, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                let joined_at = format_ts(new.created_at);
                for user_id in new.participant_ids {
                    stmt.execute(rusqlite::params![
                        new.id.to_string(),
                        user_id.to_string(),
                        tenant,
                        joined_at,
                    ])?;
                }
            }

            tx.commit()?;
            Ok((new.id, true))
        })
    }

    pub fn get_conversation(&self, tenant_id: Uuid, conversation_id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, tenant_id, is_group, name, created_by, created_at
                     FROM conversations WHERE id = ?1 AND tenant_id = ?2",
                    [conversation_id.to_string(), tenant_id.to_string()],
                    map_conversation,
                )
                .optional()?;

            match row {
                Some(row) => {
                    let participants = query_participant_ids(conn, tenant_id, conversation_id)?;
                    Ok(Some(row.into_model(participants)?))
                }
                None => Ok(None),
            }
        })
    }

    pub fn participant_ids(&self, tenant_id: Uuid, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| query_participant_ids(conn, tenant_id, conversation_id))
    }

    /// Members with their current directory role. `None` means the member has
    /// no directory entry in this tenant.
    pub fn participant_roles(&self, tenant_id: Uuid, conversation_id: Uuid) -> Result<Vec<(Uuid, Option<Role>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.user_id, u.role
                 FROM conversation_participants p
                 LEFT JOIN users u ON u.id = p.user_id AND u.tenant_id = p.tenant_id
                 WHERE p.conversation_id = ?1 AND p.tenant_id = ?2",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string(), tenant_id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(user_id, role)| {
                    // An unparseable role is treated like a missing one: fail closed.
                    Ok::<_, anyhow::Error>((user_id.parse::<Uuid>()?, role.and_then(|r| r.parse().ok())))
                })
                .collect()
        })
    }

    /// Conversations the user belongs to, most recently created first,
    /// with the number of unread delivered messages from other members.
    pub fn conversations_for_user(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Vec<(Conversation, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.tenant_id, c.is_group, c.name, c.created_by, c.created_at,
                        (SELECT COUNT(*) FROM messages m
                         WHERE m.conversation_id = c.id
                           AND m.sender_id != ?2
                           AND m.is_read = 0
                           AND m.delivery_status != 'scheduled') AS unread
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE c.tenant_id = ?1 AND p.user_id = ?2
                 ORDER BY c.created_at DESC",
            )?;
            let rows = stmt
                .query_map([tenant_id.to_string(), user_id.to_string()], |row| {
                    Ok((map_conversation(row)?, row.get::<_, i64>(6)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut out = Vec::with_capacity(rows.len());
            for (row, unread) in rows {
                let conversation_id: Uuid = row.id.parse()?;
                let participants = query_participant_ids(conn, tenant_id, conversation_id)?;
                out.push((row.into_model(participants)?, unread.max(0) as u64));
            }
            Ok(out)
        })
    }

    /// Distinct users sharing at least one conversation with `user_id`.
    pub fn co_participants(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT other.user_id
                 FROM conversation_participants mine
                 JOIN conversation_participants other
                   ON other.conversation_id = mine.conversation_id
                 WHERE mine.tenant_id = ?1
                   AND other.tenant_id = ?1
                   AND mine.user_id = ?2
                   AND other.user_id != ?2",
            )?;
            let ids = stmt
                .query_map([tenant_id.to_string(), user_id.to_string()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.into_iter().map(|id| id.parse::<Uuid>().map_err(anyhow::Error::from)).collect()
        })
    }

    // -- Messages --

    /// Persists a message and its attachment references atomically.
    pub fn insert_message(&self, new: &NewMessage<'_>, attachments: &[NewAttachment<'_>]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let tenant = new.tenant_id.to_string();

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, tenant_id, content, created_at,
                                       is_read, scheduled_delivery, delivery_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
                rusqlite::params![
                    new.id.to_string(),
                    new.conversation_id.to_string(),
                    new.sender_id.to_string(),
                    tenant,
                    new.content,
                    format_ts(new.created_at),
                    new.scheduled_delivery.map(format_ts),
                    new.delivery_status.as_str(),
                ],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO message_attachments
                        (id, message_id, file_ref, original_filename, size, mime_type, tenant_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for attachment in attachments {
                    let reference = attachment.reference;
                    stmt.execute(rusqlite::params![
                        attachment.id.to_string(),
                        new.id.to_string(),
                        reference.file_ref,
                        reference.original_filename,
                        i64::try_from(reference.size)?,
                        reference.mime_type,
                        tenant,
                    ])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, tenant_id: Uuid, message_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE id = ?1 AND tenant_id = ?2",
                MESSAGE_COLUMNS
            );
            let row = conn
                .query_row(&sql, [message_id.to_string(), tenant_id.to_string()], map_message)
                .optional()?;

            match row {
                Some(row) => Ok(with_attachments(conn, vec![row])?.pop()),
                None => Ok(None),
            }
        })
    }

    /// Newest-first page of a conversation as seen by `viewer_id`: messages
    /// still waiting for their delivery time are only shown to their sender.
    pub fn message_history(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        viewer_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE tenant_id = ?1
                   AND conversation_id = ?2
                   AND (delivery_status != 'scheduled' OR sender_id = ?3)
                   AND (?4 IS NULL OR created_at < ?4)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?5",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        tenant_id.to_string(),
                        conversation_id.to_string(),
                        viewer_id.to_string(),
                        before.map(format_ts),
                        limit,
                    ],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            with_attachments(conn, rows)
        })
    }

    /// Flips `is_read`. Returns false if the message was already read.
    pub fn mark_read(&self, tenant_id: Uuid, message_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1 WHERE id = ?1 AND tenant_id = ?2 AND is_read = 0",
                [message_id.to_string(), tenant_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Releases a message sent for immediate delivery: `pending` -> `delivered`.
    pub fn mark_message_delivered(&self, tenant_id: Uuid, message_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET delivery_status = 'delivered'
                 WHERE id = ?1 AND tenant_id = ?2 AND delivery_status = 'pending'",
                [message_id.to_string(), tenant_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Scheduled messages whose delivery time has passed, across all tenants,
    /// oldest due first.
    pub fn due_scheduled_messages(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE delivery_status = 'scheduled'
                   AND scheduled_delivery IS NOT NULL
                   AND scheduled_delivery <= ?1
                 ORDER BY scheduled_delivery ASC, rowid ASC
                 LIMIT ?2",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![format_ts(now), limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            with_attachments(conn, rows)
        })
    }

    /// The single-delivery gate: moves one message from `scheduled` to
    /// `delivered` and clears its delivery time. Only the caller that gets
    /// `true` back may broadcast it.
    pub fn promote_scheduled(&self, tenant_id: Uuid, message_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET delivery_status = 'delivered', scheduled_delivery = NULL
                 WHERE id = ?1 AND tenant_id = ?2 AND delivery_status = 'scheduled'",
                [message_id.to_string(), tenant_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Delivery queue --

    pub fn enqueue_deliveries(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        recipient_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO delivery_queue
                        (message_id, recipient_id, tenant_id, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
                )?;
                let ts = format_ts(now);
                for recipient in recipient_ids {
                    stmt.execute(rusqlite::params![
                        message_id.to_string(),
                        recipient.to_string(),
                        tenant_id.to_string(),
                        ts,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn mark_deliveries_delivered(
        &self,
        message_id: Uuid,
        recipient_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if recipient_ids.is_empty() {
            return Ok(());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE delivery_queue SET status = 'delivered', updated_at = ?3
                     WHERE message_id = ?1 AND recipient_id = ?2",
                )?;
                let ts = format_ts(now);
                for recipient in recipient_ids {
                    stmt.execute(rusqlite::params![
                        message_id.to_string(),
                        recipient.to_string(),
                        ts,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn delivery_queue(&self, tenant_id: Uuid, message_id: Uuid) -> Result<Vec<DeliveryQueueRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, recipient_id, status FROM delivery_queue
                 WHERE message_id = ?1 AND tenant_id = ?2
                 ORDER BY recipient_id",
            )?;
            let rows = stmt
                .query_map([message_id.to_string(), tenant_id.to_string()], |row| {
                    Ok(DeliveryQueueRow {
                        message_id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        status: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Permissions --

    pub fn load_permissions(&self) -> Result<Vec<ChatPermission>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tenant_id, from_role, to_role, can_send, can_receive FROM chat_permissions",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(PermissionRow {
                        tenant_id: row.get(0)?,
                        from_role: row.get(1)?,
                        to_role: row.get(2)?,
                        can_send: row.get(3)?,
                        can_receive: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(PermissionRow::into_model).collect()
        })
    }

    pub fn upsert_permission(&self, rule: &ChatPermission) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_permissions (tenant_id, from_role, to_role, can_send, can_receive)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant_id, from_role, to_role) DO UPDATE SET
                    can_send = excluded.can_send,
                    can_receive = excluded.can_receive",
                rusqlite::params![
                    rule.tenant_id.map(|t| t.to_string()).unwrap_or_default(),
                    rule.from_role.as_str(),
                    rule.to_role.as_str(),
                    rule.can_send,
                    rule.can_receive,
                ],
            )?;
            Ok(())
        })
    }
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        role: row.get(2)?,
        username: row.get(3)?,
    })
}

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        is_group: row.get(2)?,
        name: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        tenant_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        is_read: row.get(6)?,
        scheduled_delivery: row.get(7)?,
        delivery_status: row.get(8)?,
    })
}

fn query_participant_ids(conn: &Connection, tenant_id: Uuid, conversation_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants
         WHERE conversation_id = ?1 AND tenant_id = ?2
         ORDER BY joined_at, user_id",
    )?;
    let ids = stmt
        .query_map([conversation_id.to_string(), tenant_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    ids.into_iter().map(|id| id.parse::<Uuid>().map_err(anyhow::Error::from)).collect()
}

/// Batch-fetch attachments for a page of messages and assemble the models,
/// preserving the page order.
fn with_attachments(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=rows.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, message_id, file_ref, original_filename, size, mime_type
         FROM message_attachments WHERE message_id IN ({})
         ORDER BY rowid",
        placeholders.join(", ")
    );
    let params: Vec<&dyn ToSql> = rows.iter().map(|r| &r.id as &dyn ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let attachment_rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(AttachmentRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                file_ref: row.get(2)?,
                original_filename: row.get(3)?,
                size: row.get(4)?,
                mime_type: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_message: HashMap<String, Vec<Attachment>> = HashMap::new();
    for row in attachment_rows {
        let message_id = row.message_id.clone();
        by_message.entry(message_id).or_default().push(row.into_model()?);
    }

    rows.into_iter()
        .map(|row| {
            let attachments = by_message.remove(&row.id).unwrap_or_default();
            row.into_model(attachments)
        })
        .collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
