//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::key::RequestKey;
use super::traits::CachedEntry;
use crate::http::FetchResponse;

/// Trait for cache storage backends.
///
/// Storage is organised as named generations, each holding request-key to
/// response pairs. Implementations serialise individual operations, so
/// callers never need their own locking.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, name: &str) -> Result<()>;

  /// Names of all existing generations, sorted.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and all of its entries. Returns false if it did not exist.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Exact-key lookup inside a generation.
  fn match_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or replace an entry in an existing generation.
  ///
  /// Fails if the generation does not exist, so a version whose cache was
  /// deleted by a newer activation cannot bring it back.
  fn put_entry(&self, generation: &str, key: &RequestKey, response: &FetchResponse) -> Result<()>;

  /// Number of entries stored in a generation.
  fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// Generation name -> (request hash -> entry).
type Generations = BTreeMap<String, BTreeMap<String, CachedEntry>>;

/// Storage that keeps everything in process memory.
/// Used by tests and when persistence is disabled.
#[derive(Default)]
pub struct MemoryStorage {
  generations: Mutex<Generations>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Generations>> {
    self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open_generation(&self, name: &str) -> Result<()> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  fn match_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .lock()?
        .get(generation)
        .and_then(|entries| entries.get(&key.cache_hash()))
        .cloned(),
    )
  }

  fn put_entry(&self, generation: &str, key: &RequestKey, response: &FetchResponse) -> Result<()> {
    let entry = CachedEntry {
      url: key.url().to_string(),
      response: response.clone(),
      cached_at: Utc::now(),
    };
    self
      .lock()?
      .get_mut(generation)
      .ok_or_else(|| eyre!("Cache generation {} does not exist", generation))?
      .insert(key.cache_hash(), entry);
    Ok(())
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    Ok(self.lock()?.get(generation).map(BTreeMap::len).unwrap_or(0))
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at the given path.
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

  /// Open a private in-memory database.
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
-- One row per cache generation (proxy version)
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by sha256("METHOD URL")
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
"#;

impl CacheStorage for SqliteStorage {
  fn open_generation(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache generation {}: {}", name, e))?;

    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    let Some((url, status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let status =
      StatusCode::from_u16(status).map_err(|e| eyre!("Invalid cached status {}: {}", status, e))?;

    Ok(Some(CachedEntry {
      url,
      response: FetchResponse {
        status,
        headers: decode_headers(&headers)?,
        body: body.into(),
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put_entry(&self, generation: &str, key: &RequestKey, response: &FetchResponse) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let headers = encode_headers(&response.headers)?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists = tx
      .query_row(
        "SELECT 1 FROM cache_generations WHERE name = ?",
        params![generation],
        |_| Ok(()),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache generation {}: {}", generation, e))?
      .is_some();
    if !exists {
      return Err(eyre!("Cache generation {} does not exist", generation));
    }

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (generation, request_hash, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        key.cache_hash(),
        key.method().as_str(),
        key.url(),
        response.status.as_u16(),
        headers,
        response.body.as_ref(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", generation, e))?;

    Ok(count as usize)
  }
}

/// Serialize headers as JSON pairs of (name, raw value bytes).
fn encode_headers(headers: &HeaderMap) -> Result<Vec<u8>> {
  let pairs: Vec<(&str, &[u8])> = headers
    .iter()
    .map(|(name, value)| (name.as_str(), value.as_bytes()))
    .collect();
  serde_json::to_vec(&pairs).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_headers(data: &[u8]) -> Result<HeaderMap> {
  let pairs: Vec<(String, Vec<u8>)> =
    serde_json::from_slice(data).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  let mut headers = HeaderMap::with_capacity(pairs.len());
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid cached header name {}: {}", name, e))?;
    let value = HeaderValue::from_bytes(&value)
      .map_err(|e| eyre!("Invalid cached header value for {}: {}", name, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
