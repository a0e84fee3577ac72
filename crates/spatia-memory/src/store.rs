use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use spatia_core::anchor::Anchor;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::RefId;
use spatia_core::traits::{CommitStats, Storage, UpsertOutcome, WriteOp};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS anchors (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        body TEXT NOT NULL,
        hash TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_anchors_kind ON anchors(kind);

    CREATE TABLE IF NOT EXISTS principals (
        name TEXT PRIMARY KEY,
        root_id TEXT NOT NULL
    );";

/// SQLite-backed anchor store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SpatiaError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| SpatiaError::Database(e.to_string()))?;

        // WAL lets concurrent contexts read while one commits
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| SpatiaError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| SpatiaError::Database(e.to_string()))?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| SpatiaError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| SpatiaError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored anchors.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM anchors", [], |row| row.get(0))
            .map_err(|e| SpatiaError::Database(e.to_string()))?;
        Ok(n as usize)
    }
}

fn upsert_on(conn: &Connection, anchor: &Anchor) -> Result<UpsertOutcome> {
    let id = anchor.id.to_string();
    let hash = anchor.content_hash();

    let stored: Option<String> = conn
        .query_row("SELECT hash FROM anchors WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| SpatiaError::Database(e.to_string()))?;

    if stored.as_deref() == Some(hash.as_str()) {
        return Ok(UpsertOutcome::Unchanged);
    }

    conn.execute(
        "INSERT INTO anchors (id, kind, body, hash, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             body = excluded.body,
             hash = excluded.hash,
             updated_at = excluded.updated_at",
        params![
            id,
            anchor.id.kind().name(),
            anchor.to_stored()?,
            hash,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| SpatiaError::Database(e.to_string()))?;

    Ok(if stored.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    })
}

fn delete_on(conn: &Connection, id: &RefId) -> Result<bool> {
    let deleted = conn
        .execute("DELETE FROM anchors WHERE id = ?1", params![id.to_string()])
        .map_err(|e| SpatiaError::Database(e.to_string()))?;
    Ok(deleted > 0)
}

impl Storage for SqliteStore {
    fn find_by_id(&self, id: &RefId) -> Result<Option<Anchor>> {
        let conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;

        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM anchors WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SpatiaError::Database(e.to_string()))?;

        match body {
            Some(body) => {
                let anchor = Anchor::from_stored(&body).map_err(|e| SpatiaError::CorruptAnchor {
                    id: id.to_string(),
                    message: e.to_string(),
                })?;
                if anchor.id != *id {
                    return Err(SpatiaError::CorruptAnchor {
                        id: id.to_string(),
                        message: format!("row holds {}", anchor.id),
                    });
                }
                Ok(Some(anchor))
            }
            None => Ok(None),
        }
    }

    fn upsert(&self, anchor: &Anchor) -> Result<UpsertOutcome> {
        let conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        upsert_on(&conn, anchor)
    }

    fn exists(&self, id: &RefId) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM anchors WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SpatiaError::Database(e.to_string()))?;
        Ok(found.is_some())
    }

    fn delete(&self, id: &RefId) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        delete_on(&conn, id)
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<CommitStats> {
        let mut conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| SpatiaError::Database(e.to_string()))?;

        let mut stats = CommitStats::default();
        for op in ops {
            match op {
                WriteOp::Upsert(anchor) => match upsert_on(&tx, anchor)? {
                    UpsertOutcome::Unchanged => stats.unchanged += 1,
                    _ => stats.written += 1,
                },
                WriteOp::Delete(id) => {
                    if delete_on(&tx, id)? {
                        stats.deleted += 1;
                    }
                }
            }
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit().map_err(|e| SpatiaError::Database(e.to_string()))?;
        debug!(
            written = stats.written,
            unchanged = stats.unchanged,
            deleted = stats.deleted,
            "Batch committed"
        );
        Ok(stats)
    }

    fn root_of(&self, principal: &str) -> Result<Option<RefId>> {
        let conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        let root: Option<String> = conn
            .query_row(
                "SELECT root_id FROM principals WHERE name = ?1",
                params![principal],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SpatiaError::Database(e.to_string()))?;

        root.map(|r| {
            r.parse().map_err(|e: SpatiaError| SpatiaError::CorruptAnchor {
                id: r.clone(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    fn bind_root(&self, principal: &str, root: &RefId) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO principals (name, root_id) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET root_id = excluded.root_id",
            params![principal, root.to_string()],
        )
        .map_err(|e| SpatiaError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spatia_core::anchor::{Architype, Payload};
    use spatia_core::id::{EntityKind, PUBLIC_ROOT};

    fn city(name: &str) -> Anchor {
        let mut anchor = Anchor::new(
            Architype::node(Payload::new("City").with("name", name)),
            PUBLIC_ROOT,
        );
        anchor.persistent = true;
        anchor
    }

    #[test]
    fn test_upsert_and_find() {
        let store = SqliteStore::in_memory().unwrap();
        let anchor = city("Oslo");

        assert_eq!(store.upsert(&anchor).unwrap(), UpsertOutcome::Inserted);
        let loaded = store.find_by_id(&anchor.id).unwrap().unwrap();
        assert_eq!(loaded.architype, anchor.architype);
        assert!(loaded.state.connected);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn test_identical_upsert_is_noop() {
        let store = SqliteStore::in_memory().unwrap();
        let mut anchor = city("Oslo");

        store.upsert(&anchor).unwrap();
        assert_eq!(store.upsert(&anchor).unwrap(), UpsertOutcome::Unchanged);

        anchor.architype.payload_mut().set("name", "Bergen");
        assert_eq!(store.upsert(&anchor).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_missing_is_none() {
        let store = SqliteStore::in_memory().unwrap();
        let id = RefId::generate(EntityKind::Node);
        assert!(store.find_by_id(&id).unwrap().is_none());
        assert!(!store.exists(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
    }

    #[test]
    fn test_corrupt_row_is_an_error() {
        let store = SqliteStore::in_memory().unwrap();
        let id = RefId::generate(EntityKind::Node);
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO anchors (id, kind, body, hash, updated_at) VALUES (?1, 'node', '{\"id\":', 'x', 'now')",
                params![id.to_string()],
            )
            .unwrap();
        }
        assert!(matches!(
            store.find_by_id(&id),
            Err(SpatiaError::CorruptAnchor { .. })
        ));
    }

    #[test]
    fn test_apply_batch() {
        let store = SqliteStore::in_memory().unwrap();
        let keep = city("Oslo");
        let gone = city("Bergen");
        store.upsert(&gone).unwrap();

        let stats = store
            .apply(&[WriteOp::Upsert(keep.clone()), WriteOp::Delete(gone.id)])
            .unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(stats.deleted, 1);
        assert!(store.exists(&keep.id).unwrap());
        assert!(!store.exists(&gone.id).unwrap());
    }

    #[test]
    fn test_principal_binding() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.root_of("alice").unwrap().is_none());

        let root = RefId::generate(EntityKind::Node);
        store.bind_root("alice", &root).unwrap();
        assert_eq!(store.root_of("alice").unwrap(), Some(root));
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        let anchor = city("Oslo");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert(&anchor).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.exists(&anchor.id).unwrap());
    }
}
