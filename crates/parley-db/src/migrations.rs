use anyhow::Result;
use parley_types::models::Role;
use rusqlite::Connection;
use tracing::info;

/// Global (tenant-less) permission rows seeded on first start:
/// (from, to, can_send, can_receive). Pairs not listed fail closed.
const DEFAULT_MATRIX: &[(Role, Role, bool, bool)] = &[
    (Role::Root, Role::Employee, true, true),
    (Role::Root, Role::TeamLead, true, true),
    (Role::Root, Role::Manager, true, true),
    (Role::Root, Role::Admin, true, true),
    (Role::Root, Role::Root, true, true),
    (Role::Admin, Role::Employee, true, true),
    (Role::Admin, Role::TeamLead, true, true),
    (Role::Admin, Role::Manager, true, true),
    (Role::Admin, Role::Admin, true, true),
    (Role::Admin, Role::Root, true, true),
    (Role::Manager, Role::Employee, true, true),
    (Role::Manager, Role::TeamLead, true, true),
    (Role::Manager, Role::Manager, true, true),
    (Role::Manager, Role::Admin, true, true),
    (Role::Manager, Role::Root, true, true),
    (Role::TeamLead, Role::Employee, true, true),
    (Role::TeamLead, Role::TeamLead, true, true),
    (Role::TeamLead, Role::Manager, true, true),
    (Role::TeamLead, Role::Admin, true, true),
    (Role::TeamLead, Role::Root, false, true),
    (Role::Employee, Role::Employee, true, true),
    (Role::Employee, Role::TeamLead, true, true),
    (Role::Employee, Role::Manager, true, true),
    (Role::Employee, Role::Admin, true, true),
];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (chat schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                tenant_id   TEXT NOT NULL,
                role        TEXT NOT NULL,
                username    TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_users_tenant ON users(tenant_id);

            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                tenant_id   TEXT NOT NULL,
                is_group    INTEGER NOT NULL,
                name        TEXT,
                created_by  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                -- sorted 'a:b' participant pair for direct conversations, NULL for groups
                direct_key  TEXT,
                UNIQUE(tenant_id, direct_key)
            );

            CREATE TABLE conversation_participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL,
                tenant_id       TEXT NOT NULL,
                joined_at       TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON conversation_participants(tenant_id, user_id);

            CREATE TABLE messages (
                id                  TEXT PRIMARY KEY,
                conversation_id     TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id           TEXT NOT NULL,
                tenant_id           TEXT NOT NULL,
                content             TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                is_read             INTEGER NOT NULL DEFAULT 0,
                scheduled_delivery  TEXT,
                delivery_status     TEXT NOT NULL
                    CHECK (delivery_status IN ('pending', 'scheduled', 'delivered', 'failed'))
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE INDEX idx_messages_due
                ON messages(delivery_status, scheduled_delivery);

            CREATE TABLE message_attachments (
                id                  TEXT PRIMARY KEY,
                message_id          TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                file_ref            TEXT NOT NULL,
                original_filename   TEXT NOT NULL,
                size                INTEGER NOT NULL,
                mime_type           TEXT NOT NULL,
                tenant_id           TEXT NOT NULL
            );

            CREATE INDEX idx_attachments_message ON message_attachments(message_id);

            -- tenant_id '' marks a global row
            CREATE TABLE chat_permissions (
                tenant_id   TEXT NOT NULL DEFAULT '',
                from_role   TEXT NOT NULL,
                to_role     TEXT NOT NULL,
                can_send    INTEGER NOT NULL,
                can_receive INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, from_role, to_role)
            );

            CREATE TABLE delivery_queue (
                message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                recipient_id    TEXT NOT NULL,
                tenant_id       TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                PRIMARY KEY (message_id, recipient_id)
            );

            CREATE INDEX idx_delivery_queue_recipient
                ON delivery_queue(tenant_id, recipient_id, status);
            ",
        )?;

        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO chat_permissions (tenant_id, from_role, to_role, can_send, can_receive)
             VALUES ('', ?1, ?2, ?3, ?4)",
        )?;
        for (from, to, can_send, can_receive) in DEFAULT_MATRIX {
            stmt.execute(rusqlite::params![from.as_str(), to.as_str(), can_send, can_receive])?;
        }

        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_permissions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows as usize, DEFAULT_MATRIX.len());
    }
}
