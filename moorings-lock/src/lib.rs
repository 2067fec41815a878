//! Distributed advisory locks for Moorings.
//!
//! A lock is a self-expiring key claimed with an owner token. Acquisition
//! retries with capped exponential backoff until its budget is spent and then
//! gives up with [`LockError::Timeout`]; it never blocks indefinitely. If a
//! holder dies, the key expires after its hold duration.
//!
//! The lock is advisory: it only excludes code that acquires it.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use moorings_lock::{DistributedLock, LockBuilder};
//! use moorings_redis::{RedisConfig, RedisService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let redis = Arc::new(RedisService::new(RedisConfig::default()).await?);
//!
//!     let lock = LockBuilder::new("app/1234/lock")
//!         .with_hold_duration(Duration::from_secs(1))
//!         .with_acquisition_timeout(Duration::from_secs(1))
//!         .build(redis);
//!
//!     let guard = lock.acquire().await?;
//!     // Critical section
//!     guard.release().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod lock;
pub mod store;

pub use lock::{DistributedLock, KeyLock, LockBuilder, LockError, LockGuard};
pub use store::LockStore;
