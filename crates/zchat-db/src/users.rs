use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, params};

use zchat_types::models::{User, UserId};

use crate::Database;
use crate::models::{USER_COLUMNS, UserRow, now, row_to_user};

impl Database {
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO users (username, password_hash, created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?3)",
                params![username, password_hash, ts],
            )?;
            let id = conn.last_insert_rowid();

            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .map_err(|e| anyhow!("User {} vanished after insert: {}", id, e))
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    [id],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE username = ?1"),
                    [username],
                    |row| {
                        Ok(UserRow {
                            user: row_to_user(row)?,
                            password_hash: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_username(&self, id: UserId) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let username = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(username)
        })
    }

    /// Active accounts in sign-up order.
    pub fn list_active_users(&self, offset: usize, limit: usize) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE is_active = 1
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let users = stmt
                .query_map(params![limit as i64, offset as i64], row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// Active accounts currently flagged online, most recently seen first.
    pub fn list_online_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE is_active = 1 AND is_online = 1
                 ORDER BY last_seen DESC, id ASC"
            ))?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// Flip the online flag; `last_seen` moves forward on every change.
    pub fn set_online(&self, id: UserId, online: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                params![id, online, now()],
            )?;
            Ok(())
        })
    }

    pub fn set_active(&self, id: UserId, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_active = ?2 WHERE id = ?1",
                params![id, active],
            )?;
            Ok(())
        })
    }
}
