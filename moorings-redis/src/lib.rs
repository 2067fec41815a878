//! # Moorings Redis
//!
//! Redis client integration used by the session store and the distributed
//! lock.
//!
//! ## Features
//!
//! - **Client modes**: a bb8 pool of connections, or one shared multiplexed
//!   connection
//! - **Raw hash commands**: byte-valued `HSET`/`HGETALL`/`HGET`/`HSETNX`
//! - **Transactions**: atomic `MULTI`/`EXEC` pipelines
//! - **Command timeouts**: every command is bounded by the configured timeout
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use moorings_redis::{ClientMode, RedisConfig, RedisService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .client_mode(ClientMode::Pooled)
//!         .pool_size(10)
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!
//!     redis
//!         .hset_multiple_raw("app/1234", &[("timeout".to_string(), vec![20, 0, 0, 0])])
//!         .await?;
//!     let fields = redis.hgetall_raw("app/1234").await?;
//!     assert_eq!(fields["timeout"], vec![20, 0, 0, 0]);
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{ClientMode, RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool};
pub use service::{PoolStats, RedisService};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{ClientMode, RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::service::RedisService;
}
