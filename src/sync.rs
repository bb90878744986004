//! Deferred-write reconciliation: a durable queue of mutating requests made
//! while offline, drained against the network when connectivity returns.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::net::Network;

/// A queued mutating request deferred due to lack of connectivity.
#[derive(Debug, Clone)]
pub struct PendingSyncItem {
  pub id: i64,
  pub target_url: String,
  pub payload: serde_json::Value,
  pub enqueued_at: DateTime<Utc>,
}

/// Durable FIFO queue of pending writes, separate from the response cache.
/// Insertion order is the causal order of the original mutating operations.
pub struct SyncQueue {
  conn: Mutex<Connection>,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_url TEXT NOT NULL,
    payload BLOB NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SyncQueue {
  /// Open or create the queue database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create sync queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open sync queue at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// Open the queue at the default location under the user data dir.
  pub fn open_default() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Self::open(&data_dir.join("bursst-cache").join("sync.db"))
  }

  /// In-memory queue, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory queue: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run sync queue migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Append a deferred write.
  pub fn enqueue(&self, target_url: &str, payload: &serde_json::Value) -> Result<()> {
    let conn = self.lock()?;
    let payload =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
    conn
      .execute(
        "INSERT INTO pending (target_url, payload, enqueued_at) VALUES (?, ?, datetime('now'))",
        params![target_url, payload],
      )
      .map_err(|e| eyre!("Failed to enqueue sync item: {}", e))?;
    Ok(())
  }

  /// All pending items in insertion order.
  pub fn all(&self) -> Result<Vec<PendingSyncItem>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, target_url, payload, enqueued_at FROM pending ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, String, Vec<u8>, String)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query pending items: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut items = Vec::with_capacity(rows.len());
    for (id, target_url, payload, enqueued_at) in rows {
      let payload = serde_json::from_slice(&payload)
        .map_err(|e| eyre!("Failed to deserialize payload: {}", e))?;
      items.push(PendingSyncItem {
        id,
        target_url,
        payload,
        enqueued_at: parse_datetime(&enqueued_at)?,
      });
    }

    Ok(items)
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending items: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Drop every pending item.
  pub fn clear(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM pending", [])
      .map_err(|e| eyre!("Failed to clear pending items: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Drains the pending-write queue against the network on a sync trigger.
pub struct SyncReconciler {
  queue: Arc<SyncQueue>,
  network: Arc<dyn Network>,
}

impl SyncReconciler {
  pub fn new(queue: Arc<SyncQueue>, network: Arc<dyn Network>) -> Self {
    Self { queue, network }
  }

  /// Replay every pending item as a JSON POST, sequentially and in insertion
  /// order, then clear the whole queue.
  ///
  /// The queue is cleared even when individual replays failed: a failed
  /// replay is logged and dropped, not retried. Known weakness, kept
  /// deliberately (last-write-wins at the server, no per-item tracking).
  ///
  /// Returns the number of attempted replays.
  pub async fn drain(&self) -> Result<usize> {
    let items = self.queue.all()?;
    if items.is_empty() {
      return Ok(0);
    }
    info!("replaying {} pending sync items", items.len());

    for item in &items {
      match Url::parse(&item.target_url) {
        Ok(url) => {
          if let Err(err) = self.network.post_json(&url, &item.payload).await {
            warn!("sync replay failed for {}: {}", item.target_url, err);
          }
        }
        Err(err) => {
          warn!("dropping sync item with invalid url {}: {}", item.target_url, err);
        }
      }
    }

    self.queue.clear()?;
    Ok(items.len())
  }
}
