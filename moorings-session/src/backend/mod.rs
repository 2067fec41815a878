//! Key-value storage seam for session records.
//!
//! The protocol needs hash fields, per-key expiry and an atomic batch
//! (`MULTI`/`EXEC` on Redis). Every backend is also a [`LockStore`] so the
//! distributed session lock lives in the same store as the records.

use async_trait::async_trait;
use moorings_lock::LockStore;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::SessionResult;

pub mod memory;
pub mod redis;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// Hash fields as stored.
pub type FieldMap = HashMap<String, Vec<u8>>;

/// One command inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Set hash fields. Reply: always `true`.
    SetFields {
        key: String,
        fields: Vec<(String, Vec<u8>)>,
    },
    /// Set the key's TTL. Reply: `true` if the key exists.
    Expire { key: String, ttl: Duration },
    /// Delete the key. Reply: `true` if it existed.
    Delete { key: String },
}

/// Commands applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fields(mut self, key: impl Into<String>, fields: Vec<(String, Vec<u8>)>) -> Self {
        self.ops.push(BatchOp::SetFields {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(BatchOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Storage backend for session records.
#[async_trait]
pub trait SessionBackend: LockStore + Send + Sync {
    /// All fields of a hash; empty if the key is missing.
    async fn get_all_fields(&self, key: &str) -> SessionResult<FieldMap>;

    async fn get_field(&self, key: &str, field: &str) -> SessionResult<Option<Vec<u8>>>;

    async fn set_fields(&self, key: &str, fields: &[(String, Vec<u8>)]) -> SessionResult<()>;

    /// Set a field only if it is not already present.
    async fn set_field_if_absent(&self, key: &str, field: &str, value: &[u8])
    -> SessionResult<bool>;

    async fn delete(&self, key: &str) -> SessionResult<bool>;

    async fn exists(&self, key: &str) -> SessionResult<bool>;

    /// Set the key's TTL. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool>;

    /// Remaining TTL, `None` for a missing key or one without expiry.
    async fn ttl(&self, key: &str) -> SessionResult<Option<Duration>>;

    /// Apply a batch atomically. Returns one reply per command.
    async fn commit(&self, batch: Batch) -> SessionResult<Vec<bool>>;

    /// Backend name, for diagnostics.
    fn backend_name(&self) -> &'static str;
}
