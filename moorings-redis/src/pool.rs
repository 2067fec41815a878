//! Redis connections: a bb8 pool or one shared multiplexed connection.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use std::ops::{Deref, DerefMut};
use tracing::info;

use crate::{ClientMode, RedisConfig, RedisError, Result};

/// Type alias for the connection pool.
pub type RedisPool = Pool<RedisConnectionManager>;

/// A connection checked out of a [`RedisService`](crate::RedisService).
///
/// Derefs to [`MultiplexedConnection`] in both client modes, so commands are
/// written once with `query_async(&mut *conn)`.
pub enum RedisConnection<'a> {
    /// Borrowed from the pool; returned when dropped.
    Pooled(PooledConnection<'a, RedisConnectionManager>),
    /// A clone of the shared connection.
    Basic(MultiplexedConnection),
}

impl Deref for RedisConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Pooled(conn) => &**conn,
            Self::Basic(conn) => conn,
        }
    }
}

impl DerefMut for RedisConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Pooled(conn) => &mut **conn,
            Self::Basic(conn) => conn,
        }
    }
}

/// The connection source behind a service.
pub(crate) enum Clients {
    Pooled(RedisPool),
    Basic(MultiplexedConnection),
}

/// Builds the connection source selected by [`RedisConfig::client_mode`].
pub(crate) struct ClientsBuilder {
    config: RedisConfig,
}

impl ClientsBuilder {
    pub(crate) fn new(config: RedisConfig) -> Self {
        Self { config }
    }

    pub(crate) async fn build(self) -> Result<Clients> {
        self.config.validate()?;

        match self.config.client_mode {
            ClientMode::Pooled => self.build_pool().await.map(Clients::Pooled),
            ClientMode::Basic => self.build_basic().await.map(Clients::Basic),
        }
    }

    async fn build_pool(&self) -> Result<RedisPool> {
        let url = self.config.connection_url();

        let manager = RedisConnectionManager::new(url)
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .min_idle(self.config.min_idle)
            .connection_timeout(self.config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| RedisError::Pool(e.to_string()))?;

        // Scoped so the probe connection goes back before the pool is returned
        {
            let mut conn = pool.get().await?;
            self.prepare(&mut conn).await?;
        }

        info!(
            pool_size = self.config.pool_size,
            url = %self.config.display_url(),
            "Redis connection pool created"
        );

        Ok(pool)
    }

    async fn build_basic(&self) -> Result<MultiplexedConnection> {
        let client = redis::Client::open(self.config.connection_url())
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        let mut conn = tokio::time::timeout(
            self.config.connection_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| RedisError::Connection(e.to_string()))?;

        self.prepare(&mut conn).await?;

        info!(url = %self.config.display_url(), "Redis connection opened");

        Ok(conn)
    }

    /// Ping the server and register the connection name, if any.
    async fn prepare(&self, conn: &mut MultiplexedConnection) -> Result<()> {
        let _: String = redis::cmd("PING")
            .query_async(conn)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        if let Some(name) = &self.config.connection_name {
            let _: () = redis::cmd("CLIENT")
                .arg("SETNAME")
                .arg(name)
                .query_async(conn)
                .await?;
        }

        Ok(())
    }
}
