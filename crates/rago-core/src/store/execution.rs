//! Conversation / Plan Storage, execution half: an opaque-JSON table over
//! the `executions` schema, persisting `workflow::Execution` records at the
//! workflow engine's end-of-run paths.

use rusqlite::params;

use crate::error::Result;

use super::schema::Database;

impl Database {
    /// Inserts or replaces an execution's serialized record by id.
    pub fn put_execution(
        &self,
        id: &str,
        workflow_id: &str,
        record: &str,
        created_at: &str,
        updated_at: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO executions (id, workflow_id, record, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at",
            params![id, workflow_id, record, created_at, updated_at],
        )?;
        Ok(())
    }

    /// Fetches an execution's serialized record by id.
    pub fn get_execution(&self, id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT record FROM executions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the serialized records of every execution of one workflow,
    /// most recently updated first.
    pub fn list_executions(&self, workflow_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT record FROM executions WHERE workflow_id = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![workflow_id], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
