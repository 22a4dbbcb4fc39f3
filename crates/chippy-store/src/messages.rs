use tracing::{debug, info, instrument};

use chippy_core::{Message, MessageId, Role};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Point-addressed access to the `messages` relation.
///
/// Every statement binds its values as parameters; content is never
/// spliced into SQL text.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the row for `id`. Re-delivery of an id overwrites
    /// the previous row (last write wins).
    #[instrument(skip(self, content), fields(message_id = %id, parent_id = ?parent_id, role = %role, len = content.len()))]
    pub fn upsert(
        &self,
        id: MessageId,
        parent_id: Option<MessageId>,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (message_id, parent_id, role, content)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id) DO UPDATE SET
                     parent_id = excluded.parent_id,
                     role = excluded.role,
                     content = excluded.content",
                rusqlite::params![id.get(), parent_id.map(MessageId::get), role.as_str(), content],
            )?;
            Ok(())
        })?;
        debug!("message stored");
        Ok(())
    }

    /// Store a whole message value.
    pub fn put(&self, message: &Message) -> Result<(), StoreError> {
        self.upsert(message.id, message.parent_id, message.role, &message.content)
    }

    /// Get a single message by id.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: MessageId) -> Result<Message, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
    }

    /// Like [`get`](Self::get), but absence is `Ok(None)`.
    pub fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT message_id, parent_id, role, content FROM messages WHERE message_id = ?1",
            )?;
            let mut rows = stmt.query([id.get()])?;
            match rows.next()? {
                Some(row) => row_to_message(row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Count stored messages.
    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })
    }

    /// Drop every stored message, the sentinel included. Administrative only.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<usize, StoreError> {
        let removed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM messages", [])?))?;
        info!(removed, "message store reset");
        Ok(removed)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let role: String = row_helpers::get(row, 2, "messages", "role")?;

    Ok(Message {
        id: MessageId::new(row_helpers::get(row, 0, "messages", "message_id")?),
        parent_id: row_helpers::get_opt::<i64>(row, 1, "messages", "parent_id")?.map(MessageId::new),
        role: row_helpers::parse_enum(&role, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
    })
}
