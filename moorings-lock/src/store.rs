//! Storage seam for distributed locks.

use async_trait::async_trait;
use moorings_redis::RedisService;
use moorings_redis::redis::Script;
use std::sync::LazyLock;
use std::time::Duration;

use crate::lock::LockError;

/// Compare-and-delete: only the holder of `ARGV[1]` may remove the key.
static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
        "#,
    )
});

/// The two atomic primitives a lock needs from a key-value store.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically set `key` to `token` with a server-side expiry of `hold`,
    /// only if `key` does not exist. Returns `true` if the key was claimed.
    async fn try_claim(&self, key: &str, token: &str, hold: Duration) -> Result<bool, LockError>;

    /// Delete `key` if it still holds `token`. Returns `true` if it was deleted.
    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError>;
}

#[async_trait]
impl LockStore for RedisService {
    async fn try_claim(&self, key: &str, token: &str, hold: Duration) -> Result<bool, LockError> {
        Ok(self.set_nx_px(key, token, hold).await?)
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let deleted: i32 = self.invoke_script(&RELEASE_SCRIPT, &[key], &[token]).await?;
        Ok(deleted == 1)
    }
}
