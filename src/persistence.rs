//! Persisted `{id}` store backing the Server Registry's reconciliation pass.
//!
//! Realizes Design Note 1: rather than a decorator-driven schema, the table
//! is described by one explicit descriptor and created by one routine.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Column descriptor for the single table this module owns.
///
/// Exists so the schema lives in one place as data rather than being
/// scattered across ad-hoc `CREATE TABLE` strings.
struct ColumnDescriptor {
    name: &'static str,
    sql_type: &'static str,
    constraints: &'static str,
}

const SERVERS_TABLE: &str = "servers";
const SERVERS_COLUMNS: &[ColumnDescriptor] = &[ColumnDescriptor {
    name: "id",
    sql_type: "TEXT",
    constraints: "PRIMARY KEY NOT NULL",
}];

fn ensure_schema(conn: &Connection) -> Result<()> {
    let columns: Vec<String> = SERVERS_COLUMNS
        .iter()
        .map(|c| format!("{} {} {}", c.name, c.sql_type, c.constraints))
        .collect();
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {SERVERS_TABLE} ({})",
        columns.join(", ")
    );
    conn.execute(&sql, []).context("failed to create servers table")?;
    Ok(())
}

/// The set of server ids this node knows about, independent of whether a
/// container currently exists for each one.
pub trait IdStore: Send + Sync {
    fn list_ids(&self) -> Result<Vec<String>>;
    fn add_id(&self, id: &str) -> Result<()>;
    fn remove_id(&self, id: &str) -> Result<()>;
}

pub struct SqliteIdStore {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteIdStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open id store at {}", path.display()))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory id store")?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }
}

impl IdStore for SqliteIdStore {
    fn list_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT id FROM {SERVERS_TABLE}"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn add_id(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("INSERT OR IGNORE INTO {SERVERS_TABLE} (id) VALUES (?1)"),
            [id],
        )?;
        Ok(())
    }

    fn remove_id(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(&format!("DELETE FROM {SERVERS_TABLE} WHERE id = ?1"), [id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let store = SqliteIdStore::open_in_memory().unwrap();
        assert!(store.list_ids().unwrap().is_empty());
    }

    #[test]
    fn add_then_list() {
        let store = SqliteIdStore::open_in_memory().unwrap();
        store.add_id("s1").unwrap();
        store.add_id("s2").unwrap();
        let mut ids = store.list_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn add_is_idempotent() {
        let store = SqliteIdStore::open_in_memory().unwrap();
        store.add_id("s1").unwrap();
        store.add_id("s1").unwrap();
        assert_eq!(store.list_ids().unwrap().len(), 1);
    }

    #[test]
    fn remove_deletes() {
        let store = SqliteIdStore::open_in_memory().unwrap();
        store.add_id("s1").unwrap();
        store.remove_id("s1").unwrap();
        assert!(store.list_ids().unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ids.sqlite");
        {
            let store = SqliteIdStore::open(&path).unwrap();
            store.add_id("s1").unwrap();
        }
        let reopened = SqliteIdStore::open(&path).unwrap();
        assert_eq!(reopened.list_ids().unwrap(), vec!["s1".to_string()]);
    }
}
