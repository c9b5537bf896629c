//! Where raw conversation and message rows come from.

use std::path::Path;

use eyre::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error;
use crate::importer::{ConversationRow, MessageRow};
use crate::model::{self, BuildOptions, Dataset};
use crate::utils::{apply_key, snapshot_database};

/// A queryable message store.
pub trait RecordSource {
    fn conversation_rows(&mut self) -> error::Result<Vec<ConversationRow>>;
    /// Message rows in send order.
    fn message_rows(&mut self) -> error::Result<Vec<MessageRow>>;
}

/// Read every row from `source` and build the dataset.
pub fn fetch(source: &mut dyn RecordSource, options: &BuildOptions) -> error::Result<Dataset> {
    let conversations = source.conversation_rows()?;
    let messages = source.message_rows()?;
    debug!(
        "Fetched {} conversation rows, {} message rows",
        conversations.len(),
        messages.len()
    );
    Ok(model::build(&conversations, &messages, options))
}

/// Signal Desktop's SQLite store, read through a private snapshot.
///
/// The snapshot lives in a temporary file removed when the source drops.
pub struct SqliteSource {
    conn: Connection,
    _snapshot: Option<NamedTempFile>,
}

impl SqliteSource {
    /// Snapshot the store at `db_path`, unlock it with `key` and open it.
    pub fn open(db_path: &Path, key: &str) -> Result<Self> {
        info!("Fetching data from {}", db_path.display());
        let snapshot = snapshot_database(db_path, Some(key))?;
        let conn = Connection::open_with_flags(
            snapshot.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .wrap_err("Failed to open database snapshot")?;
        apply_key(&conn, key).wrap_err("Failed to unlock database snapshot")?;
        Ok(Self {
            conn,
            _snapshot: Some(snapshot),
        })
    }

    /// Use an already opened (and unlocked) connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            _snapshot: None,
        }
    }
}

impl RecordSource for SqliteSource {
    fn conversation_rows(&mut self) -> error::Result<Vec<ConversationRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT type, id, e164, name, profileName, members FROM conversations")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ConversationRow {
                    kind: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    id: row.get(1)?,
                    e164: row.get(2)?,
                    name: row.get(3)?,
                    profile_name: row.get(4)?,
                    members: row.get(5)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    fn message_rows(&mut self) -> error::Result<Vec<MessageRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT json, conversationId FROM messages ORDER BY sent_at")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MessageRow {
                    json: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    conversation_id: row.get(1)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}

/// Rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub conversations: Vec<ConversationRow>,
    pub messages: Vec<MessageRow>,
}

impl RecordSource for StaticSource {
    fn conversation_rows(&mut self) -> error::Result<Vec<ConversationRow>> {
        Ok(self.conversations.clone())
    }

    fn message_rows(&mut self) -> error::Result<Vec<MessageRow>> {
        Ok(self.messages.clone())
    }
}
