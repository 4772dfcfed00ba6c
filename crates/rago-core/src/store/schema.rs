//! Database handle and schema initialization, shared by every store.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use uuid::Uuid;

use crate::error::Result;

/// Where a `Database`'s connection points, so a second, independent
/// connection to the same backing store can be opened later: vector and
/// keyword search run on separate blocking threads at once, and a single
/// `rusqlite::Connection` is not `Sync`.
enum DbOrigin {
    File(PathBuf),
    /// A `cache=shared` in-memory URI; every connection opened against it
    /// sees the same database for as long as at least one stays open.
    Memory(String),
}

/// Shared SQLite handle backing the Document, Vector, Keyword, and
/// Conversation/Plan stores.
pub struct Database {
    pub(crate) conn: Connection,
    origin: DbOrigin,
}

const SCHEMA_VERSION: i32 = 1;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    path TEXT,
    url TEXT,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    collection TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id TEXT PRIMARY KEY REFERENCES chunks(id),
    collection TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    chunk_id UNINDEXED,
    document_id UNINDEXED,
    tokenize='porter unicode61'
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    record TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection);
CREATE INDEX IF NOT EXISTS idx_embeddings_collection ON embeddings(collection);
"#;

impl Database {
    /// Opens (creating if necessary) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            origin: DbOrigin::File(path.to_path_buf()),
        })
    }

    /// Opens an in-memory database, for tests and dry runs. Backed by a
    /// `cache=shared` URI (rather than a plain `:memory:` connection) so
    /// `open_secondary` can still reach it.
    pub fn open_in_memory() -> Result<Self> {
        let uri = format!("file:rago-mem-{}?mode=memory&cache=shared", Uuid::new_v4());
        let conn = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self {
            conn,
            origin: DbOrigin::Memory(uri),
        })
    }

    /// Opens an independent connection to the same backing database. Used
    /// to run two store reads concurrently on separate blocking threads,
    /// since a single `rusqlite::Connection` cannot be shared across them.
    pub fn open_secondary(&self) -> Result<Database> {
        match &self.origin {
            DbOrigin::File(path) => Ok(Database {
                conn: Connection::open(path)?,
                origin: DbOrigin::File(path.clone()),
            }),
            DbOrigin::Memory(uri) => {
                let conn = Connection::open_with_flags(
                    uri,
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
                )?;
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                Ok(Database {
                    conn,
                    origin: DbOrigin::Memory(uri.clone()),
                })
            }
        }
    }

    /// Creates all tables/indexes/virtual tables and records the schema version.
    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        self.conn.execute_batch(CREATE_TABLES)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            rusqlite::params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Returns the recorded schema version, if the database has been initialized.
    pub fn schema_version(&self) -> Result<Option<i32>> {
        let version = self
            .conn
            .query_row(
                "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .ok();
        Ok(version)
    }

    /// Drops and recreates every table, destroying all stored state.
    pub fn reset(&self) -> Result<()> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS chunks_fts;
             DROP TABLE IF EXISTS embeddings;
             DROP TABLE IF EXISTS chunks;
             DROP TABLE IF EXISTS collections;
             DROP TABLE IF EXISTS documents;
             DROP TABLE IF EXISTS conversations;
             DROP TABLE IF EXISTS executions;
             DROP TABLE IF EXISTS schema_version;",
        )?;
        self.initialize()
    }
}
