//! Conversation / Plan Storage, conversation half: an opaque-JSON table
//! over the `conversations` schema. Domain-level (de)serialization of
//! `coordinator::Conversation` happens at the caller, persisting a JSON blob
//! rather than a column-per-field schema.

use rusqlite::params;

use crate::error::Result;

use super::schema::Database;

impl Database {
    /// Inserts or replaces a conversation's serialized state by id.
    pub fn put_conversation(
        &self,
        id: &str,
        state: &str,
        created_at: &str,
        last_active_at: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO conversations (id, state, created_at, last_active_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                last_active_at = excluded.last_active_at",
            params![id, state, created_at, last_active_at],
        )?;
        Ok(())
    }

    /// Fetches a conversation's serialized state by id.
    pub fn get_conversation(&self, id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT state FROM conversations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        );
        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every conversation last active before `cutoff` (an RFC 3339
    /// timestamp), for TTL sweeping.
    pub fn delete_conversations_before(&self, cutoff: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM conversations WHERE last_active_at < ?1",
            params![cutoff],
        )?;
        Ok(())
    }
}
