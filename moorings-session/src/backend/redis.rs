//! Redis session backend.

use async_trait::async_trait;
use moorings_lock::{LockError, LockStore};
use moorings_redis::{RedisConfig, RedisService};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{Batch, BatchOp, FieldMap, SessionBackend};
use crate::error::{SessionError, SessionResult};

/// Session backend over a shared [`RedisService`]. Records are hashes,
/// batches run as `MULTI`/`EXEC`.
#[derive(Clone)]
pub struct RedisBackend {
    redis: Arc<RedisService>,
}

impl RedisBackend {
    /// Wrap an existing service.
    pub fn new(redis: Arc<RedisService>) -> Self {
        Self { redis }
    }

    /// Connect with the given configuration.
    pub async fn connect(config: RedisConfig) -> SessionResult<Self> {
        debug!(url = %config.display_url(), mode = ?config.client_mode, "Connecting session backend");
        let redis = RedisService::new(config).await?;
        Ok(Self::new(Arc::new(redis)))
    }

    /// The underlying service.
    pub fn service(&self) -> &Arc<RedisService> {
        &self.redis
    }
}

/// Reply shape of a queued command.
#[derive(Clone, Copy)]
enum Reply {
    Written,
    KeyExisted,
}

#[async_trait]
impl SessionBackend for RedisBackend {
    async fn get_all_fields(&self, key: &str) -> SessionResult<FieldMap> {
        Ok(self.redis.hgetall_raw(key).await?)
    }

    async fn get_field(&self, key: &str, field: &str) -> SessionResult<Option<Vec<u8>>> {
        Ok(self.redis.hget_raw(key, field).await?)
    }

    async fn set_fields(&self, key: &str, fields: &[(String, Vec<u8>)]) -> SessionResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        Ok(self.redis.hset_multiple_raw(key, fields).await?)
    }

    async fn set_field_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &[u8],
    ) -> SessionResult<bool> {
        Ok(self.redis.hsetnx_raw(key, field, value).await?)
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        Ok(self.redis.delete(key).await?)
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        Ok(self.redis.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool> {
        Ok(self.redis.expire(key, ttl).await?)
    }

    async fn ttl(&self, key: &str) -> SessionResult<Option<Duration>> {
        Ok(self.redis.ttl(key).await?)
    }

    async fn commit(&self, batch: Batch) -> SessionResult<Vec<bool>> {
        let mut pipe = RedisService::transaction();
        let mut queued = Vec::with_capacity(batch.len());

        for op in batch.ops() {
            match op {
                // HSET with no fields is a syntax error
                BatchOp::SetFields { fields, .. } if fields.is_empty() => queued.push(None),
                BatchOp::SetFields { key, fields } => {
                    pipe.cmd("HSET").arg(key.as_str());
                    for (name, value) in fields {
                        pipe.arg(name.as_str()).arg(value.as_slice());
                    }
                    queued.push(Some(Reply::Written));
                }
                BatchOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE")
                        .arg(key.as_str())
                        .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
                    queued.push(Some(Reply::KeyExisted));
                }
                BatchOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key.as_str());
                    queued.push(Some(Reply::KeyExisted));
                }
            }
        }

        let sent = queued.iter().flatten().count();
        trace!(ops = batch.len(), sent, "Committing batch");
        let mut replies = if sent == 0 {
            Vec::new()
        } else {
            self.redis.exec::<Vec<i64>>(&pipe).await?
        }
        .into_iter();

        if replies.len() != sent {
            return Err(SessionError::Store(format!(
                "transaction returned {} replies for {sent} commands",
                replies.len()
            )));
        }

        Ok(queued
            .into_iter()
            .map(|shape| match (shape, shape.and_then(|_| replies.next())) {
                (Some(Reply::KeyExisted), Some(n)) => n > 0,
                _ => true,
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl LockStore for RedisBackend {
    async fn try_claim(&self, key: &str, token: &str, hold: Duration) -> Result<bool, LockError> {
        self.redis.try_claim(key, token, hold).await
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError> {
        self.redis.release_if_owner(key, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RedisConfig {
        RedisConfig::new(
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        )
    }

    fn field(name: &str, value: &[u8]) -> (String, Vec<u8>) {
        (name.to_string(), value.to_vec())
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_commit_against_redis() {
        let backend = RedisBackend::connect(test_config()).await.unwrap();
        let key = "moorings-test/backend/commit";
        backend.delete(key).await.unwrap();

        let replies = backend
            .commit(
                Batch::new()
                    .set_fields(key, vec![field("a", b"1"), field("b", &[0, 255])])
                    .set_fields(key, vec![])
                    .expire(key, Duration::from_secs(60))
                    .expire("moorings-test/backend/missing", Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(replies, vec![true, true, true, false]);

        let fields = backend.get_all_fields(key).await.unwrap();
        assert_eq!(fields.get("b").map(Vec::as_slice), Some(&[0u8, 255][..]));
        assert!(backend.ttl(key).await.unwrap().is_some());

        assert_eq!(backend.commit(Batch::new().delete(key)).await.unwrap(), vec![true]);
        assert!(!backend.exists(key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_lock_store_against_redis() {
        let backend = RedisBackend::connect(test_config()).await.unwrap();
        let key = "moorings-test/backend/lock";
        let hold = Duration::from_secs(5);
        backend.delete(key).await.unwrap();

        assert!(backend.try_claim(key, "t1", hold).await.unwrap());
        assert!(!backend.try_claim(key, "t2", hold).await.unwrap());
        assert!(!backend.release_if_owner(key, "t2").await.unwrap());
        assert!(backend.release_if_owner(key, "t1").await.unwrap());
    }
}
