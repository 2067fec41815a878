//! In-memory session backend.
//!
//! A single map behind one mutex, so batches are atomic. Expiry uses the
//! tokio clock, which lets tests drive TTLs with a paused runtime. Expired
//! keys are evicted when touched, and writes sweep the whole map at most
//! once per [`SWEEP_INTERVAL`]. Suitable for single-instance deployments
//! and testing; for distributed deployments use the Redis backend.

use async_trait::async_trait;
use moorings_lock::{LockError, LockStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Batch, BatchOp, FieldMap, SessionBackend};
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone)]
enum Value {
    Hash(FieldMap),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Minimum time between two full sweeps of expired keys.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-memory session backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    next_sweep: Mutex<Option<Instant>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        debug!("Creating new in-memory session backend");
        Self::default()
    }

    /// Number of live keys, records and locks alike.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Drop every key.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remove every expired key and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        *self.next_sweep.lock() = Some(now + SWEEP_INTERVAL);
        purge(&mut entries, now)
    }

    /// Sweep if the last sweep is older than [`SWEEP_INTERVAL`].
    fn maybe_sweep(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let mut next = self.next_sweep.lock();
        if next.is_some_and(|at| at > now) {
            return;
        }
        *next = Some(now + SWEEP_INTERVAL);
        purge(entries, now);
    }
}

fn purge(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, e| e.is_live(now));
    let purged = before - entries.len();
    if purged > 0 {
        debug!(purged, remaining = entries.len(), "Purged expired keys");
    }
    purged
}

/// Evict `key` if expired, then return it.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        trace!(key = %key, "Evicting expired key");
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn wrong_type(key: &str) -> SessionError {
    SessionError::Store(format!("WRONGTYPE key '{key}' does not hold a hash"))
}

fn hash_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> SessionResult<&'a mut FieldMap> {
    if live(entries, key, now).is_none() {
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(FieldMap::new()),
                expires_at: None,
            },
        );
    }
    match entries.get_mut(key).map(|e| &mut e.value) {
        Some(Value::Hash(fields)) => Ok(fields),
        _ => Err(wrong_type(key)),
    }
}

fn check_op(entries: &mut HashMap<String, Entry>, op: &BatchOp, now: Instant) -> SessionResult<()> {
    if let BatchOp::SetFields { key, .. } = op
        && let Some(Entry {
            value: Value::Text(_),
            ..
        }) = live(entries, key, now)
    {
        return Err(wrong_type(key));
    }
    Ok(())
}

fn apply_op(entries: &mut HashMap<String, Entry>, op: BatchOp, now: Instant) -> SessionResult<bool> {
    match op {
        BatchOp::SetFields { key, fields } => {
            hash_mut(entries, &key, now)?.extend(fields);
            Ok(true)
        }
        BatchOp::Expire { key, ttl } => Ok(match live(entries, &key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }),
        BatchOp::Delete { key } => {
            let existed = live(entries, &key, now).is_some();
            if existed {
                entries.remove(&key);
            }
            Ok(existed)
        }
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn get_all_fields(&self, key: &str) -> SessionResult<FieldMap> {
        let mut entries = self.entries.lock();
        match live(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(FieldMap::new()),
        }
    }

    async fn get_field(&self, key: &str, field: &str) -> SessionResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match live(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_fields(&self, key: &str, fields: &[(String, Vec<u8>)]) -> SessionResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.maybe_sweep(&mut entries, now);
        hash_mut(&mut entries, key, now)?.extend(fields.iter().cloned());
        Ok(())
    }

    async fn set_field_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &[u8],
    ) -> SessionResult<bool> {
        let mut entries = self.entries.lock();
        let fields = hash_mut(&mut entries, key, Instant::now())?;
        if fields.contains_key(field) {
            return Ok(false);
        }
        fields.insert(field.to_string(), value.to_vec());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        let mut entries = self.entries.lock();
        apply_op(&mut entries, BatchOp::Delete { key: key.to_string() }, Instant::now())
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        let mut entries = self.entries.lock();
        Ok(live(&mut entries, key, Instant::now()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool> {
        let mut entries = self.entries.lock();
        let op = BatchOp::Expire {
            key: key.to_string(),
            ttl,
        };
        apply_op(&mut entries, op, Instant::now())
    }

    async fn ttl(&self, key: &str) -> SessionResult<Option<Duration>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(live(&mut entries, key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn commit(&self, batch: Batch) -> SessionResult<Vec<bool>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        trace!(ops = batch.len(), "Committing batch");
        self.maybe_sweep(&mut entries, now);

        for op in batch.ops() {
            check_op(&mut entries, op, now)?;
        }
        batch
            .into_ops()
            .into_iter()
            .map(|op| apply_op(&mut entries, op, now))
            .collect()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl LockStore for MemoryBackend {
    async fn try_claim(&self, key: &str, token: &str, hold: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.maybe_sweep(&mut entries, now);
        if live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(token.to_string()),
                expires_at: Some(now + hold),
            },
        );
        Ok(true)
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut entries = self.entries.lock();
        let owned = matches!(
            live(&mut entries, key, Instant::now()),
            Some(Entry { value: Value::Text(owner), .. }) if owner == token
        );
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}
