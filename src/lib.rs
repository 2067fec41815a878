// Moorings - shared session state for clustered web applications
//
// Sessions live in Redis as hash records that every server can read. A
// request may lock its session exclusively; only the holder of the lock id
// can store, release or remove it.

// Re-export the session store
pub use moorings_session::*;

// Re-export supporting crates
pub use moorings_lock;
pub use moorings_redis;

pub mod logging;
