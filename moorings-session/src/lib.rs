//! Session state storage for Moorings.
//!
//! Each session is one hash record in a key-value store, read and written by
//! web requests that may run on many servers at once. A request can take an
//! exclusive lock on the record, and only the holder of that lock id may
//! later store, release or remove it. Records expire after their idle
//! timeout; every write refreshes the expiry in the same transaction.
//!
//! The stored record and its item collection use a fixed binary layout that
//! existing deployments already read and write, so the codec in
//! [`codec`] and [`record`] is byte-exact and must not change.
//!
//! # Backends
//!
//! - [`RedisBackend`] - Redis through `moorings-redis` (pooled or single
//!   multiplexed connection)
//! - [`MemoryBackend`] - in-process, for tests and single-instance use
//!
//! # Examples
//!
//! ```no_run
//! use moorings_session::*;
//! use moorings_redis::RedisConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let store = RedisSessionStateStore::connect(
//!         RedisConfig::from_env().build(),
//!         SessionStoreOptions::new("Harbour"),
//!     )
//!     .await?;
//!
//!     // First request: create and lock
//!     store.create_uninitialized_item("1234", 20).await?;
//!     if let GetItemResult::Found { mut data, lock_id, .. } =
//!         store.get_item_exclusive("1234").await?
//!     {
//!         data.items.insert("name", "Felix");
//!         store
//!             .set_and_release_item_exclusive("1234", &data, lock_id, false)
//!             .await?;
//!     }
//!
//!     // Later request: shared read
//!     if let Some(data) = store.get_item("1234").await?.into_data() {
//!         println!("name = {:?}", data.items.get("name"));
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## In-memory store
//!
//! ```
//! use moorings_session::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = SessionStateStore::builder()
//!     .backend(Arc::new(MemoryBackend::new()))
//!     .options(SessionStoreOptions::new("Harbour"))
//!     .build()
//!     .unwrap();
//!
//! let data = SessionData::new([("name", "Felix")].into_iter().collect(), 20);
//! store.set_and_release_item_exclusive("1234", &data, None, true).await.unwrap();
//!
//! let result = store.get_item("1234").await.unwrap();
//! assert_eq!(result.data(), Some(&data));
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod items;
pub mod record;
pub mod store;
pub mod ticks;
pub mod traits;
pub mod writer;

pub use backend::{Batch, BatchOp, FieldMap, MemoryBackend, RedisBackend, SessionBackend};
pub use codec::{decode_items, encode_items};
pub use config::{DEFAULT_NAME, LockNotAcquiredHandler, SessionStoreOptions};
pub use error::{SessionError, SessionResult};
pub use items::{SessionItems, SessionValue};
pub use record::{RecordLock, SessionFlags, SessionRecord};
pub use store::{RedisSessionStateStore, SessionStateStore, SessionStateStoreBuilder};
pub use traits::{GetItemResult, SessionData, SessionStateProvider};
pub use writer::write_record;
