use crate::Database;
use crate::models::{NewUser, StoreError, UserRow};
use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use prochat_types::models::{Message, MessageView};

const USER_COLUMNS: &str = "id, name, email, password, handle, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<(), StoreError> {
        let now = encode_ts(now());
        let conn = self.conn_guard()?;
        conn.execute(
            "INSERT INTO users (id, name, name_lc, email, password, handle, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                user.id.to_string(),
                user.name,
                user.name.to_lowercase(),
                user.email,
                user.password_hash,
                user.handle,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_handle(&self, handle: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "handle", handle))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    /// Case-insensitive substring match on name or handle, excluding `exclude`.
    pub fn search_users(&self, query: &str, exclude: Uuid) -> Result<Vec<UserRow>> {
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE (name_lc LIKE ?1 ESCAPE '\\' OR handle LIKE ?1 ESCAPE '\\')
                   AND id <> ?2
                 ORDER BY name"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, exclude.to_string()], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Friends --

    /// Make `a` and `b` friends of each other. Both rows land or neither does.
    pub fn add_friendship(&self, a: Uuid, b: Uuid) -> Result<()> {
        if a == b {
            return Err(anyhow!("A user cannot befriend themselves"));
        }
        let now = encode_ts(now());
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for (user, friend) in [(a, b), (b, a)] {
                tx.execute(
                    "INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![user.to_string(), friend.to_string(), now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Remove the friendship in both directions. Removing a non-friend is a no-op.
    pub fn remove_friendship(&self, a: Uuid, b: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM friendships
                 WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
                rusqlite::params![a.to_string(), b.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn are_friends(&self, user_id: Uuid, friend_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
                    rusqlite::params![user_id.to_string(), friend_id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_friends(&self, user_id: Uuid) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.email, u.password, u.handle, u.created_at
                 FROM friendships f
                 JOIN users u ON u.id = f.friend_id
                 WHERE f.user_id = ?1
                 ORDER BY f.created_at, u.name",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_friend_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.get_friends(user_id)?.into_iter().map(|u| u.id).collect())
    }

    // -- Messages --

    /// Store a message. `text` is trimmed before storage.
    pub fn insert_message(&self, sender: Uuid, recipient: Uuid, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("Message text is empty"));
        }

        let now = now();
        let message = Message {
            id: Uuid::new_v4(),
            sender,
            recipient,
            text: text.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    message.id.to_string(),
                    sender.to_string(),
                    recipient.to_string(),
                    message.text,
                    encode_ts(now)
                ],
            )?;
            Ok(())
        })?;

        Ok(message)
    }

    pub fn get_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, text, created_at, updated_at
                 FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![a.to_string(), b.to_string()], |row| {
                    Ok(Message {
                        id: get_uuid(row, 0)?,
                        sender: get_uuid(row, 1)?,
                        recipient: get_uuid(row, 2)?,
                        text: row.get(3)?,
                        created_at: get_ts(row, 4)?,
                        updated_at: get_ts(row, 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Resolve sender/recipient of a stored message to display fields.
    pub fn populate_message(&self, message: &Message) -> Result<MessageView> {
        let sender = self
            .get_user_by_id(message.sender)?
            .ok_or_else(|| anyhow!("User not found: {}", message.sender))?;
        let recipient = self
            .get_user_by_id(message.recipient)?
            .ok_or_else(|| anyhow!("User not found: {}", message.recipient))?;

        Ok(MessageView {
            id: message.id,
            sender: sender.to_ref(),
            recipient: recipient.to_ref(),
            text: message.text.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
        })
    }

    fn conn_guard(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    let row = stmt.query_row([value], map_user).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        handle: row.get(4)?,
        created_at: get_ts(row, 5)?,
    })
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Microsecond precision, so a value read back compares equal to the one written.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339, so text order is time order.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
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
