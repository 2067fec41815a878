//! Redis service: one entry point for connections and the raw commands the
//! session store and lock are built on.

use redis::aio::MultiplexedConnection;
use redis::{FromRedisValue, Pipeline, RedisResult, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

use crate::{
    ClientMode, RedisConfig, RedisError, Result,
    pool::{Clients, ClientsBuilder, RedisConnection},
};

/// Redis service providing pooled or shared connections and raw commands.
///
/// Values are handled as raw bytes throughout; callers own their encoding.
pub struct RedisService {
    config: RedisConfig,
    clients: Clients,
}

impl RedisService {
    /// Connect using the client mode selected in `config`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let clients = ClientsBuilder::new(config.clone()).build().await?;
        Ok(Self { config, clients })
    }

    /// Wrap an existing multiplexed connection (basic mode).
    pub fn from_connection(config: RedisConfig, conn: MultiplexedConnection) -> Self {
        let config = RedisConfig {
            client_mode: ClientMode::Basic,
            ..config
        };
        Self {
            config,
            clients: Clients::Basic(conn),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// The client mode this service was built with.
    pub fn client_mode(&self) -> ClientMode {
        match self.clients {
            Clients::Pooled(_) => ClientMode::Pooled,
            Clients::Basic(_) => ClientMode::Basic,
        }
    }

    /// Get a connection.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        match &self.clients {
            Clients::Pooled(pool) => Ok(RedisConnection::Pooled(pool.get().await?)),
            Clients::Basic(conn) => Ok(RedisConnection::Basic(conn.clone())),
        }
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = self.timed(redis::cmd("PING").query_async(&mut *conn)).await?;
        Ok(())
    }

    /// Get pool statistics. `None` in basic mode.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        match &self.clients {
            Clients::Pooled(pool) => {
                let state = pool.state();
                Some(PoolStats {
                    connections: state.connections,
                    idle_connections: state.idle_connections,
                })
            }
            Clients::Basic(_) => None,
        }
    }

    /// Bound a command by the configured command timeout.
    async fn timed<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> Result<T> {
        tokio::time::timeout(self.config.command_timeout, fut)
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(RedisError::from)
    }

    // Hash commands with raw byte values

    /// Set several hash fields at once. Does nothing for an empty field list.
    pub async fn hset_multiple_raw(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        trace!(key = %key, fields = fields.len(), "HSET");
        if fields.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value.as_slice());
        }

        let mut conn = self.get().await?;
        let _: i64 = self.timed(cmd.query_async(&mut *conn)).await?;
        Ok(())
    }

    /// Get every field of a hash. A missing key yields an empty map.
    pub async fn hgetall_raw(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        trace!(key = %key, "HGETALL");
        let mut conn = self.get().await?;
        self.timed(redis::cmd("HGETALL").arg(key).query_async(&mut *conn))
            .await
    }

    /// Get one hash field.
    pub async fn hget_raw(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        trace!(key = %key, field = %field, "HGET");
        let mut conn = self.get().await?;
        self.timed(redis::cmd("HGET").arg(key).arg(field).query_async(&mut *conn))
            .await
    }

    /// Set a hash field only if it does not exist yet.
    pub async fn hsetnx_raw(&self, key: &str, field: &str, value: &[u8]) -> Result<bool> {
        trace!(key = %key, field = %field, "HSETNX");
        let mut conn = self.get().await?;
        self.timed(
            redis::cmd("HSETNX")
                .arg(key)
                .arg(field)
                .arg(value)
                .query_async(&mut *conn),
        )
        .await
    }

    // Key commands

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        let deleted: u32 = self
            .timed(redis::cmd("DEL").arg(key).query_async(&mut *conn))
            .await?;
        Ok(deleted > 0)
    }

    /// Check if a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        self.timed(redis::cmd("EXISTS").arg(key).query_async(&mut *conn))
            .await
    }

    /// Set expiration on a key. Returns `false` if the key does not exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get().await?;
        self.timed(
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl.as_millis() as u64)
                .query_async(&mut *conn),
        )
        .await
    }

    /// Remaining TTL of a key; `None` if the key is missing or never expires.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.get().await?;
        let ttl_ms: i64 = self
            .timed(redis::cmd("PTTL").arg(key).query_async(&mut *conn))
            .await?;

        if ttl_ms < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(ttl_ms as u64)))
        }
    }

    /// `SET key value NX PX ttl`. Returns `true` if the key was claimed.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get().await?;
        let reply: Option<String> = self
            .timed(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis().max(1) as u64)
                    .query_async(&mut *conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    // Transactions and scripts

    /// Start an atomic (`MULTI`/`EXEC`) pipeline.
    pub fn transaction() -> Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe
    }

    /// Execute a pipeline built with [`RedisService::transaction`].
    pub async fn exec<T: FromRedisValue>(&self, pipe: &Pipeline) -> Result<T> {
        let mut conn = self.get().await?;
        self.timed(pipe.query_async(&mut *conn)).await
    }

    /// Run a Lua script.
    pub async fn invoke_script<T: FromRedisValue>(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[&str],
    ) -> Result<T> {
        let mut conn = self.get().await?;
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(*arg);
        }
        self.timed(invocation.invoke_async(&mut *conn)).await
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(mode: ClientMode) -> RedisConfig {
        RedisConfig::builder()
            .url("redis://localhost:6379")
            .client_mode(mode)
            .build()
    }

    #[test]
    fn test_transaction_is_atomic_pipeline() {
        let mut pipe = RedisService::transaction();
        pipe.cmd("PING");
        // MULTI/EXEC wrapping shows up in the packed command stream
        let packed = String::from_utf8_lossy(&pipe.get_packed_pipeline()).to_string();
        assert!(packed.contains("MULTI"));
        assert!(packed.contains("EXEC"));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_raw_hash_roundtrip() {
        let redis = RedisService::new(local_config(ClientMode::Basic)).await.unwrap();

        redis.delete("moorings:test:hash").await.unwrap();
        redis
            .hset_multiple_raw(
                "moorings:test:hash",
                &[
                    ("a".to_string(), vec![1, 2, 3, 4]),
                    ("b".to_string(), vec![1]),
                    ("c".to_string(), vec![]),
                ],
            )
            .await
            .unwrap();

        let all = redis.hgetall_raw("moorings:test:hash").await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all["a"], vec![1, 2, 3, 4]);
        assert_eq!(all["b"], vec![1]);
        assert!(all["c"].is_empty());

        let one = redis.hget_raw("moorings:test:hash", "a").await.unwrap();
        assert_eq!(one, Some(vec![1, 2, 3, 4]));

        redis.delete("moorings:test:hash").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_hsetnx_keeps_first_value() {
        let redis = RedisService::new(local_config(ClientMode::Pooled)).await.unwrap();

        redis.delete("moorings:test:nx").await.unwrap();
        assert!(redis.hsetnx_raw("moorings:test:nx", "a", &[1, 2, 3, 4]).await.unwrap());
        assert!(!redis.hsetnx_raw("moorings:test:nx", "a", &[4, 5, 6, 7]).await.unwrap());
        assert_eq!(
            redis.hget_raw("moorings:test:nx", "a").await.unwrap(),
            Some(vec![1, 2, 3, 4])
        );

        redis.delete("moorings:test:nx").await.unwrap();
    }
}
