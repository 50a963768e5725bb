//! Cache storage trait and its SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::{Request, Response};

/// Trait for cache storage backends.
///
/// A backend holds named partitions, each mapping request identity to a
/// stored response. Writes to the same key are last-writer-wins.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist.
  fn open(&self, partition: &str) -> Result<()>;

  /// Look up a request in one partition.
  fn get(&self, partition: &str, request: &Request) -> Result<Option<Response>>;

  /// Look up a request across all partitions, oldest partition first.
  fn get_any(&self, request: &Request) -> Result<Option<Response>>;

  /// Store a response, creating the partition if needed.
  fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store several responses atomically: either all land or none do.
  fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Names of all partitions, in creation order.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and every entry in it. Returns false if absent.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Number of entries in a partition (0 if absent).
  fn entry_count(&self, partition: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Non-persistent database, gone when dropped.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named partitions; id order is creation order
CREATE TABLE IF NOT EXISTS partitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    partition_id INTEGER NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_id, key_hash),
    FOREIGN KEY (partition_id) REFERENCES partitions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key_hash);
"#;

const ENSURE_PARTITION: &str = "INSERT OR IGNORE INTO partitions (name) VALUES (?)";

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries
   (partition_id, key_hash, method, url, status, status_text, headers, body, stored_at)
   SELECT id, ?, ?, ?, ?, ?, ?, ?, datetime('now') FROM partitions WHERE name = ?";

/// Columns read back into a `Response`.
type ResponseRow = (u16, String, String, Vec<u8>);

fn decode_row(row: ResponseRow) -> Result<Response> {
  let (status, status_text, headers, body) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
  Ok(Response {
    status,
    status_text,
    headers,
    body,
  })
}

fn upsert(conn: &Connection, partition: &str, request: &Request, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        request.cache_hash(),
        request.method,
        request.url.as_str(),
        response.status,
        response.status_text,
        headers,
        response.body,
        partition
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", request.cache_key(), e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, partition: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(ENSURE_PARTITION, params![partition])
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    Ok(())
  }

  fn get(&self, partition: &str, request: &Request) -> Result<Option<Response>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<ResponseRow> = conn
      .query_row(
        "SELECT e.status, e.status_text, e.headers, e.body FROM entries e
         INNER JOIN partitions p ON p.id = e.partition_id
         WHERE p.name = ? AND e.key_hash = ?",
        params![partition, request.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query partition {}: {}", partition, e))?;

    row.map(decode_row).transpose()
  }

  fn get_any(&self, request: &Request) -> Result<Option<Response>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<ResponseRow> = conn
      .query_row(
        "SELECT e.status, e.status_text, e.headers, e.body FROM entries e
         INNER JOIN partitions p ON p.id = e.partition_id
         WHERE e.key_hash = ?
         ORDER BY p.id
         LIMIT 1",
        params![request.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    row.map(decode_row).transpose()
  }

  fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute(ENSURE_PARTITION, params![partition])
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;
    upsert(&tx, partition, request, response)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction on an early return rolls it back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute(ENSURE_PARTITION, params![partition])
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;
    for (request, response) in entries {
      upsert(&tx, partition, request, response)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute(
      "DELETE FROM entries WHERE partition_id IN (SELECT id FROM partitions WHERE name = ?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", partition, e))?;
    let deleted = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries e
         INNER JOIN partitions p ON p.id = e.partition_id
         WHERE p.name = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", partition, e))?;

    Ok(count as usize)
  }
}

/// Storage that lives only as long as the process.
/// Used for `--ephemeral` runs and in tests.
#[derive(Default)]
pub struct MemoryStorage {
  /// Partitions in creation order
  partitions: Mutex<Vec<(String, BTreeMap<String, Response>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

fn partition_mut<'a>(
  partitions: &'a mut Vec<(String, BTreeMap<String, Response>)>,
  name: &str,
) -> &'a mut BTreeMap<String, Response> {
  let index = match partitions.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      partitions.push((name.to_string(), BTreeMap::new()));
      partitions.len() - 1
    }
  };
  &mut partitions[index].1
}

impl CacheStorage for MemoryStorage {
  fn open(&self, partition: &str) -> Result<()> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partition_mut(&mut partitions, partition);
    Ok(())
  }

  fn get(&self, partition: &str, request: &Request) -> Result<Option<Response>> {
    let partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      partitions
        .iter()
        .find(|(n, _)| n == partition)
        .and_then(|(_, entries)| entries.get(&request.cache_key()))
        .cloned(),
    )
  }

  fn get_any(&self, request: &Request) -> Result<Option<Response>> {
    let partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = request.cache_key();

    Ok(
      partitions
        .iter()
        .find_map(|(_, entries)| entries.get(&key))
        .cloned(),
    )
  }

  fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<()> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partition_mut(&mut partitions, partition).insert(request.cache_key(), response.clone());
    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let target = partition_mut(&mut partitions, partition);
    for (request, response) in entries {
      target.insert(request.cache_key(), response.clone());
    }
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = partitions.len();
    partitions.retain(|(n, _)| n != partition);
    Ok(partitions.len() != before)
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .iter()
        .find(|(n, _)| n == partition)
        .map(|(_, entries)| entries.len())
        .unwrap_or(0),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:5000").unwrap().join(path).unwrap())
  }

  fn json(body: &str) -> Response {
    Response {
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  fn backends() -> Vec<(&'static str, Box<dyn CacheStorage>)> {
    vec![
      ("memory", Box::new(MemoryStorage::new())),
      ("sqlite", Box::new(SqliteStorage::open_in_memory().unwrap())),
    ]
  }

  #[test]
  fn test_store_then_retrieve_round_trips() {
    for (name, storage) in backends() {
      let req = request("/api/districts/3/performance");
      let resp = json(r#"{"workersEmployed":50000}"#).with_header("sw-cached-at", "1700000000000");

      storage.put("api-v2", &req, &resp).unwrap();

      assert_eq!(storage.get("api-v2", &req).unwrap(), Some(resp), "{name}");
    }
  }

  #[test]
  fn test_partitions_are_isolated() {
    for (name, storage) in backends() {
      let req = request("/app.js");
      storage.put("static-v2", &req, &json("js")).unwrap();

      assert!(storage.get("api-v2", &req).unwrap().is_none(), "{name}");
      assert!(storage.get_any(&req).unwrap().is_some(), "{name}");
      assert_eq!(storage.entry_count("static-v2").unwrap(), 1, "{name}");
      assert_eq!(storage.entry_count("api-v2").unwrap(), 0, "{name}");
    }
  }

  #[test]
  fn test_put_overwrites_same_key() {
    for (name, storage) in backends() {
      let req = request("/api/districts");
      storage.put("api-v2", &req, &json("[1]")).unwrap();
      storage.put("api-v2", &req, &json("[1,2]")).unwrap();

      let stored = storage.get("api-v2", &req).unwrap().unwrap();
      assert_eq!(stored.text(), "[1,2]", "{name}");
      assert_eq!(storage.entry_count("api-v2").unwrap(), 1, "{name}");
    }
  }

  #[test]
  fn test_get_any_prefers_oldest_partition() {
    for (name, storage) in backends() {
      let req = request("/");
      storage.put("first", &req, &json("first")).unwrap();
      storage.put("second", &req, &json("second")).unwrap();

      assert_eq!(storage.get_any(&req).unwrap().unwrap().text(), "first", "{name}");
      assert_eq!(storage.partitions().unwrap(), vec!["first", "second"], "{name}");
    }
  }

  #[test]
  fn test_delete_partition_removes_entries() {
    for (name, storage) in backends() {
      let req = request("/");
      storage.put("mgnrega-static-v1", &req, &json("old")).unwrap();
      storage.open("mgnrega-static-v2").unwrap();

      assert!(storage.delete_partition("mgnrega-static-v1").unwrap(), "{name}");
      assert!(!storage.delete_partition("mgnrega-static-v1").unwrap(), "{name}");
      assert!(storage.get_any(&req).unwrap().is_none(), "{name}");
      assert_eq!(storage.partitions().unwrap(), vec!["mgnrega-static-v2"], "{name}");
    }
  }

  #[test]
  fn test_put_all_stores_every_entry() {
    for (name, storage) in backends() {
      let entries = vec![
        (request("/"), json("<html>")),
        (request("/manifest.json"), json("{}")),
      ];
      storage.put_all("static", &entries).unwrap();
      assert_eq!(storage.entry_count("static").unwrap(), 2, "{name}");
    }
  }

  #[test]
  fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let req = request("/api/alerts/4");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.put("mgnrega-api-v2", &req, &json("[]")).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.partitions().unwrap(), vec!["mgnrega-api-v2"]);
    assert_eq!(storage.get("mgnrega-api-v2", &req).unwrap().unwrap().text(), "[]");
  }
}
