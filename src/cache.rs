use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FetchError, StoreError};

/// Fast write-once store for reference data shared by every subject.
///
/// A `set` on a key that already holds a value is a no-op, so concurrent
/// writers racing on the same key all observe the first value.
#[derive(Debug, Default)]
pub struct EphemeralStore {
    entries: RwLock<HashMap<String, Value>>,
    hashes: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// Returns `true` when this call stored the value.
    pub fn set(&self, key: &str, value: Value) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), value);
        true
    }

    pub fn get_field(&self, hash: &str, field: &str) -> Option<Value> {
        let hashes = self.hashes.read().unwrap_or_else(PoisonError::into_inner);
        hashes.get(hash).and_then(|fields| fields.get(field)).cloned()
    }

    pub fn set_field(&self, hash: &str, field: &str, value: Value) -> bool {
        let mut hashes = self.hashes.write().unwrap_or_else(PoisonError::into_inner);
        let fields = hashes.entry(hash.to_string()).or_default();
        if fields.contains_key(field) {
            return false;
        }
        fields.insert(field.to_string(), value);
        true
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let hashes = self.hashes.read().unwrap_or_else(PoisonError::into_inner);
        entries.len() + hashes.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sqlite-backed document collections keyed by a natural id.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces; the latest write wins.
    pub fn upsert<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        doc: &T,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc)?;
        self.conn().execute(
            r#"
            INSERT INTO documents (collection, doc_key, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(collection, doc_key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
            params![collection, key, body, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let body: Option<String> = self
            .conn()
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND doc_key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Documents of `collection` matching `predicate`, decoded lazily.
    ///
    /// Rows that no longer decode as `T` are skipped.
    pub fn find<T, P>(
        &self,
        collection: &str,
        mut predicate: P,
    ) -> Result<impl Iterator<Item = T> + use<T, P>, StoreError>
    where
        T: DeserializeOwned,
        P: FnMut(&T) -> bool,
    {
        let bodies = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT doc_key, body FROM documents WHERE collection = ?1 ORDER BY doc_key",
            )?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let collection = collection.to_string();
        Ok(bodies.into_iter().filter_map(move |(key, body)| {
            match serde_json::from_str::<T>(&body) {
                Ok(doc) if predicate(&doc) => Some(doc),
                Ok(_) => None,
                Err(err) => {
                    warn!("skipping undecodable {collection}/{key}: {err}");
                    None
                }
            }
        }))
    }

    /// Expression index over one (possibly dotted) JSON field of a collection.
    pub fn ensure_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        if !is_identifier(collection) {
            return Err(StoreError::InvalidIdentifier(collection.to_string()));
        }
        if !field.split('.').all(is_identifier) {
            return Err(StoreError::InvalidIdentifier(field.to_string()));
        }
        let index_name = format!("idx_{collection}_{}", field.replace('.', "_"));
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {index_name} \
             ON documents(json_extract(body, '$.{field}')) \
             WHERE collection = '{collection}'"
        );
        self.conn().execute_batch(&sql)?;
        debug!("ensured index {index_name}");
        Ok(())
    }

    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            doc_key TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (collection, doc_key)
        );
        "#,
    )?;
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Which tiers a cache-aside read consults and fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Ephemeral tier only; effectively permanent for the process.
    Shared,
    /// Ephemeral, then durable; live results land in both.
    Persisted,
}

/// Both cache tiers, built once at startup and passed by reference.
pub struct Caches {
    pub ephemeral: EphemeralStore,
    pub durable: DocumentStore,
}

impl Caches {
    pub fn new(durable: DocumentStore) -> Self {
        Self {
            ephemeral: EphemeralStore::new(),
            durable,
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(DocumentStore::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(DocumentStore::open_in_memory()?))
    }

    /// Cache-aside read: ephemeral, then durable (per `policy`), then `fetch`.
    ///
    /// Store failures degrade to a live fetch; they never fail the read.
    pub fn read_through<T, F>(
        &self,
        policy: CachePolicy,
        collection: &str,
        key: &str,
        fetch: F,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, FetchError>,
    {
        let ephemeral_key = format!("{collection}:{key}");
        if let Some(value) = self.ephemeral.get(&ephemeral_key)
            && let Ok(hit) = serde_json::from_value::<T>(value)
        {
            return Ok(hit);
        }

        if policy == CachePolicy::Persisted {
            match self.durable.get::<T>(collection, key) {
                Ok(Some(hit)) => {
                    self.remember(&ephemeral_key, &hit);
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(err) => warn!("durable read {collection}/{key} failed: {err}"),
            }
        }

        let fresh = fetch()?;
        if policy == CachePolicy::Persisted
            && let Err(err) = self.durable.upsert(collection, key, &fresh)
        {
            warn!("durable write {collection}/{key} failed: {err}");
        }
        self.remember(&ephemeral_key, &fresh);
        Ok(fresh)
    }

    fn remember<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.ephemeral.set(key, value);
            }
            Err(err) => warn!("ephemeral encode {key} failed: {err}"),
        }
    }
}
