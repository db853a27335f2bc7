use anyhow::Result;
use rusqlite::Connection;
use tracing::debug;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_online       INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            last_seen       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY,
            name        TEXT,
            is_group    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations(updated_at DESC);

        CREATE TABLE IF NOT EXISTS conversation_participants (
            user_id          INTEGER NOT NULL REFERENCES users(id),
            conversation_id  INTEGER NOT NULL REFERENCES conversations(id),
            joined_at        TEXT NOT NULL,
            last_read_at     TEXT,
            PRIMARY KEY (user_id, conversation_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_conversation
            ON conversation_participants(conversation_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY,
            conversation_id  INTEGER NOT NULL REFERENCES conversations(id),
            sender_id        INTEGER NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            file_path        TEXT,
            file_type        TEXT,
            created_at       TEXT NOT NULL,
            is_deleted       INTEGER NOT NULL DEFAULT 0,
            is_edited        INTEGER NOT NULL DEFAULT 0,
            is_read          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at DESC, id DESC);

        CREATE TABLE IF NOT EXISTS user_deleted_messages (
            user_id     INTEGER NOT NULL REFERENCES users(id),
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            deleted_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, message_id)
        );
        ",
    )?;

    debug!("Database migrations complete");
    Ok(())
}
