use super::{
    decode_document, encode_document, lock, merge_document, validate_root_id, MergeMode,
    PersistenceGateway, Subscribers, Subscription,
};
use crate::error::Result;
use crate::schema::Collection;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Gateway over a SQLite database: one row per root document, keyed
/// by (namespace, id), holding the whole tree as a JSON blob.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    namespace: String,
    merge_mode: MergeMode,
    subscribers: Subscribers,
}

impl SqliteGateway {
    /// Open or create the database at the given path.
    pub fn open(path: &Path, namespace: &str, merge_mode: MergeMode) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, namespace, merge_mode)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(namespace: &str, merge_mode: MergeMode) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, namespace, merge_mode)
    }

    fn from_connection(conn: Connection, namespace: &str, merge_mode: MergeMode) -> Result<Self> {
        initialize_tables(&conn)?;
        Ok(SqliteGateway {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
            merge_mode,
            subscribers: Subscribers::default(),
        })
    }

    /// All root documents in this namespace, ordered by id.
    /// Rows that no longer decode are skipped with a warning.
    pub fn list_documents(&self) -> Result<Vec<Collection>> {
        let conn = lock(&self.conn);
        list_documents(&conn, &self.namespace)
    }
}

fn initialize_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            namespace TEXT NOT NULL,
            id TEXT NOT NULL,
            data_json TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (namespace, id)
        );
        ",
    )?;
    Ok(())
}

fn get_document(conn: &Connection, namespace: &str, id: &str) -> Result<Option<Collection>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT data_json FROM documents WHERE namespace = ?1 AND id = ?2",
            params![namespace, id],
            |row| row.get(0),
        )
        .optional()?;
    json.as_deref().map(decode_document).transpose()
}

fn list_documents(conn: &Connection, namespace: &str) -> Result<Vec<Collection>> {
    let mut stmt =
        conn.prepare("SELECT id, data_json FROM documents WHERE namespace = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![namespace], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut roots = Vec::new();
    for row in rows {
        let (id, json) = row?;
        match decode_document(&json) {
            Ok(root) => roots.push(root),
            Err(e) => log::warn!("Skipping unreadable root document {namespace}/{id}: {e}"),
        }
    }
    Ok(roots)
}

impl PersistenceGateway for SqliteGateway {
    fn subscribe(&self) -> Result<Subscription> {
        let snapshot = self.list_documents()?;
        Ok(self.subscribers.add(snapshot))
    }

    fn get_document(&self, id: &str) -> Result<Option<Collection>> {
        let conn = lock(&self.conn);
        get_document(&conn, &self.namespace, id)
    }

    fn set_documents(&self, roots: &[Collection]) -> Result<bool> {
        if roots.is_empty() {
            return Ok(false);
        }

        let snapshot = {
            let mut conn = lock(&self.conn);
            // dropping the transaction on an early return rolls it back
            let tx = conn.transaction()?;
            for root in roots {
                validate_root_id(&root.id)?;
                let existing = get_document(&tx, &self.namespace, &root.id)?;
                let merged = merge_document(existing.as_ref(), root, self.merge_mode)?;
                tx.execute(
                    "INSERT OR REPLACE INTO documents (namespace, id, data_json, updated_at)
                     VALUES (?1, ?2, ?3, datetime('now'))",
                    params![self.namespace, merged.id, encode_document(&merged)?],
                )?;
            }
            tx.commit()?;
            list_documents(&conn, &self.namespace)?
        };

        self.subscribers.broadcast(&snapshot);
        Ok(true)
    }

    fn remove_documents(&self, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let snapshot = {
            let mut conn = lock(&self.conn);
            let tx = conn.transaction()?;
            for id in ids {
                tx.execute(
                    "DELETE FROM documents WHERE namespace = ?1 AND id = ?2",
                    params![self.namespace, id],
                )?;
            }
            tx.commit()?;
            list_documents(&conn, &self.namespace)?
        };

        self.subscribers.broadcast(&snapshot);
        Ok(())
    }

    fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }
}
