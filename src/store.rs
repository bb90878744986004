//! Named cache stores: backend trait, SQLite and in-memory implementations,
//! and the registry handed to strategies and the lifecycle manager.
//!
//! A store maps an absolute request URL to a stored response snapshot. Store
//! names are either the versioned precache (wholesale-replaced on version
//! rollover) or the long-lived runtime store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::request::StoredResponse;

/// Backend for named key-value response stores.
///
/// A single get/put is atomic; concurrent writers to the same key race with
/// last-write-wins semantics.
pub trait StoreBackend: Send + Sync {
  /// Ensure a store with this name exists (opened stores are enumerable
  /// even while empty).
  fn register(&self, store: &str) -> Result<()>;

  fn get(&self, store: &str, url: &str) -> Result<Option<StoredResponse>>;

  fn put(&self, store: &str, url: &str, response: &StoredResponse) -> Result<()>;

  /// Delete a single entry. Returns whether an entry existed.
  fn delete(&self, store: &str, url: &str) -> Result<bool>;

  /// Enumerate entry URLs in a store.
  fn keys(&self, store: &str) -> Result<Vec<String>>;

  /// Atomically drop a whole store and its entries. Returns whether the
  /// store existed.
  fn delete_store(&self, store: &str) -> Result<bool>;

  fn list_stores(&self) -> Result<Vec<String>>;
}

/// Registry of named cache stores, passed explicitly into the components
/// that need store access instead of living as ambient state.
#[derive(Clone)]
pub struct CacheStoreRegistry {
  backend: Arc<dyn StoreBackend>,
}

impl CacheStoreRegistry {
  pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
    Self { backend }
  }

  /// Open a store by name, creating it if absent.
  pub fn open(&self, name: &str) -> Result<StoreHandle> {
    self.backend.register(name)?;
    Ok(StoreHandle {
      name: name.to_string(),
      backend: Arc::clone(&self.backend),
    })
  }

  /// Delete a store wholesale. Returns whether it existed.
  pub fn delete(&self, name: &str) -> Result<bool> {
    self.backend.delete_store(name)
  }

  pub fn list_names(&self) -> Result<Vec<String>> {
    self.backend.list_stores()
  }
}

/// Handle to one named store. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct StoreHandle {
  name: String,
  backend: Arc<dyn StoreBackend>,
}

impl StoreHandle {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Look up the stored response for a request URL.
  pub fn match_url(&self, url: &str) -> Result<Option<StoredResponse>> {
    self.backend.get(&self.name, url)
  }

  pub fn put(&self, url: &str, response: &StoredResponse) -> Result<()> {
    self.backend.put(&self.name, url, response)
  }

  pub fn delete(&self, url: &str) -> Result<bool> {
    self.backend.delete(&self.name, url)
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    self.backend.keys(&self.name)
  }
}

/// In-memory backend. Used by tests and by embedders that want the caching
/// behavior without persistence.
#[derive(Default)]
pub struct MemoryBackend {
  stores: Mutex<HashMap<String, BTreeMap<String, StoredResponse>>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }
}

impl StoreBackend for MemoryBackend {
  fn register(&self, store: &str) -> Result<()> {
    let mut stores = lock(&self.stores)?;
    stores.entry(store.to_string()).or_default();
    Ok(())
  }

  fn get(&self, store: &str, url: &str) -> Result<Option<StoredResponse>> {
    let stores = lock(&self.stores)?;
    Ok(stores.get(store).and_then(|s| s.get(url).cloned()))
  }

  fn put(&self, store: &str, url: &str, response: &StoredResponse) -> Result<()> {
    let mut stores = lock(&self.stores)?;
    stores
      .entry(store.to_string())
      .or_default()
      .insert(url.to_string(), response.clone());
    Ok(())
  }

  fn delete(&self, store: &str, url: &str) -> Result<bool> {
    let mut stores = lock(&self.stores)?;
    Ok(
      stores
        .get_mut(store)
        .is_some_and(|s| s.remove(url).is_some()),
    )
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let stores = lock(&self.stores)?;
    Ok(
      stores
        .get(store)
        .map(|s| s.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut stores = lock(&self.stores)?;
    Ok(stores.remove(store).is_some())
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    let stores = lock(&self.stores)?;
    let mut names: Vec<String> = stores.keys().cloned().collect();
    names.sort();
    Ok(names)
  }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
  mutex.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

/// SQLite-backed store implementation.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

/// Schema for cache store tables.
const STORE_SCHEMA: &str = r#"
-- Store name registry (opened stores are listed even while empty)
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by (store, request URL)
CREATE TABLE IF NOT EXISTS response_cache (
    store_name TEXT NOT NULL,
    request_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, request_url)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_store
    ON response_cache(store_name);
"#;

impl SqliteBackend {
  /// Open or create the backing database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open the database at the default location under the user data dir.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("bursst-cache").join("stores.db"))
  }

  /// In-memory database, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl StoreBackend for SqliteBackend {
  fn register(&self, store: &str) -> Result<()> {
    let conn = lock(&self.conn)?;
    conn
      .execute("INSERT OR IGNORE INTO stores (name) VALUES (?)", params![store])
      .map_err(|e| eyre!("Failed to register store: {}", e))?;
    Ok(())
  }

  fn get(&self, store: &str, url: &str) -> Result<Option<StoredResponse>> {
    let conn = lock(&self.conn)?;
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body FROM response_cache
         WHERE store_name = ? AND request_url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>)> = stmt
      .query_row(params![store, url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .ok();

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(StoredResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, url: &str, response: &StoredResponse) -> Result<()> {
    let conn = lock(&self.conn)?;
    let headers = serde_json::to_vec(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to register store: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (store_name, request_url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![store, url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn delete(&self, store: &str, url: &str) -> Result<bool> {
    let conn = lock(&self.conn)?;
    let deleted = conn
      .execute(
        "DELETE FROM response_cache WHERE store_name = ? AND request_url = ?",
        params![store, url],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;
    Ok(deleted > 0)
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let conn = lock(&self.conn)?;
    let mut stmt = conn
      .prepare(
        "SELECT request_url FROM response_cache
         WHERE store_name = ? ORDER BY request_url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls: Vec<String> = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(urls)
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let conn = lock(&self.conn)?;
    conn
      .execute(
        "DELETE FROM response_cache WHERE store_name = ?",
        params![store],
      )
      .map_err(|e| eyre!("Failed to delete store entries: {}", e))?;
    let deleted = conn
      .execute("DELETE FROM stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store: {}", e))?;
    Ok(deleted > 0)
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    let conn = lock(&self.conn)?;
    let mut stmt = conn
      .prepare("SELECT name FROM stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }
}
