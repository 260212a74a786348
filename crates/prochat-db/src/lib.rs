pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use prochat_types::models::{Message, MessageView};

pub use models::{NewUser, StoreError, UserRow};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Fresh private database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

/// The message persistence the realtime engine depends on.
///
/// Calls are blocking; async callers run them on the blocking pool.
pub trait MessageStore: Send + Sync + 'static {
    fn create_message(&self, sender: Uuid, recipient: Uuid, text: &str) -> Result<Message>;

    /// Resolve the sender and recipient ids of a stored message to display fields.
    fn expand_message(&self, message: &Message) -> Result<MessageView>;

    /// Every message exchanged between `a` and `b`, oldest first.
    fn conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>>;
}

impl MessageStore for Database {
    fn create_message(&self, sender: Uuid, recipient: Uuid, text: &str) -> Result<Message> {
        self.insert_message(sender, recipient, text)
    }

    fn expand_message(&self, message: &Message) -> Result<MessageView> {
        self.populate_message(message)
    }

    fn conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        self.get_conversation(a, b)
    }
}
