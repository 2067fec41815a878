//! Session state store: the locking protocol over a [`SessionBackend`].
//!
//! Every operation that reads a record first takes a short-lived distributed
//! lock at `{record key}{separator}lock`, so the read-modify-write of a
//! record is serialized across processes. The record itself carries a second,
//! long-lived lock: the request-level exclusive lock handed out by
//! [`get_item_exclusive`](SessionStateProvider::get_item_exclusive) and
//! checked by the fenced operations.

use async_trait::async_trait;
use moorings_lock::{DistributedLock, LockBuilder, LockGuard, LockStore};
use moorings_redis::RedisConfig;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{Batch, RedisBackend, SessionBackend};
use crate::config::SessionStoreOptions;
use crate::error::{SessionError, SessionResult};
use crate::items::SessionItems;
use crate::record::{SessionFlags, SessionRecord};
use crate::ticks;
use crate::traits::{GetItemResult, SessionData, SessionStateProvider};
use crate::writer::write_record;

/// Session store over a Redis backend.
pub type RedisSessionStateStore = SessionStateStore<RedisBackend>;

/// Session state store.
pub struct SessionStateStore<B> {
    backend: Arc<B>,
    options: SessionStoreOptions,
}

impl<B> std::fmt::Debug for SessionStateStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<B: SessionBackend + 'static> SessionStateStore<B> {
    /// Create a store from a backend and validated options.
    pub fn new(backend: Arc<B>, options: SessionStoreOptions) -> SessionResult<Self> {
        options.validate()?;
        debug!(
            backend = backend.backend_name(),
            name = %options.name,
            "Creating session state store"
        );
        Ok(Self { backend, options })
    }

    /// Start building a store.
    pub fn builder() -> SessionStateStoreBuilder<B> {
        SessionStateStoreBuilder::new()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn options(&self) -> &SessionStoreOptions {
        &self.options
    }

    /// Key of the record for `id`.
    pub fn record_key(&self, id: &str) -> String {
        format!("{}{}{}", self.options.name, self.options.key_separator, id)
    }

    /// Key of the distributed lock guarding the record for `id`.
    pub fn lock_key(&self, id: &str) -> String {
        format!("{}{}lock", self.record_key(id), self.options.key_separator)
    }

    /// Read and parse the record at `key`.
    pub async fn read_record(&self, key: &str) -> SessionResult<Option<SessionRecord>> {
        let fields = self.backend.get_all_fields(key).await?;
        SessionRecord::from_fields(&fields)
    }

    /// Take the distributed lock for `id`. `None` means it was busy; the
    /// lock-not-acquired callback has already run.
    async fn lock_session(&self, id: &str) -> SessionResult<Option<LockGuard>> {
        let lock = LockBuilder::new(self.lock_key(id))
            .with_hold_duration(self.options.lock_hold_duration)
            .with_acquisition_timeout(self.options.lock_acquisition_timeout)
            .build(Arc::clone(&self.backend) as Arc<dyn LockStore>);

        match lock.acquire().await {
            Ok(guard) => Ok(Some(guard)),
            Err(e) if e.is_not_acquired() => {
                self.options.notify_lock_not_acquired(id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unlock(&self, guard: LockGuard) {
        let key = guard.key().to_string();
        let held_for = guard.held_for();
        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "Failed to release session lock");
        } else if held_for > self.options.lock_hold_duration {
            warn!(key = %key, held_for = ?held_for, "Session lock expired before release");
        }
    }

    async fn load(&self, key: &str, exclusive: bool) -> SessionResult<GetItemResult> {
        let Some(mut record) = self.read_record(key).await? else {
            debug!(key = %key, "Session not found");
            return Ok(GetItemResult::NotFound);
        };

        let actions = record.flags;
        let now = ticks::now();

        if let Some(lock) = record.lock {
            debug!(key = %key, lock_id = lock.id, "Session locked by another request");
            return Ok(GetItemResult::Locked {
                lock_id: lock.id,
                lock_age: now - lock.acquired_at,
                actions,
            });
        }

        let lock_id = exclusive.then(|| record.acquire_lock(now));
        record.flags = SessionFlags::None;
        write_record(self.backend.as_ref(), key, &record).await?;

        let timeout = record.timeout;
        let items = if actions == SessionFlags::InitializeItem {
            SessionItems::new()
        } else {
            record.items
        };
        Ok(GetItemResult::Found {
            data: SessionData::new(items, timeout),
            lock_id,
            actions,
        })
    }

    async fn get(&self, id: &str, exclusive: bool) -> SessionResult<GetItemResult> {
        debug!(session_id = %id, exclusive, "Getting session");
        let key = self.record_key(id);

        let Some(guard) = self.lock_session(id).await? else {
            return Ok(GetItemResult::LockUnavailable);
        };
        let result = self.load(&key, exclusive).await;
        self.unlock(guard).await;

        debug!(session_id = %id, locked = ?result.as_ref().ok().map(GetItemResult::is_locked), "Got session");
        result
    }

    /// Apply `change` and write back, but only while the record is locked
    /// under `lock_id`. Returns whether the record was written.
    async fn update_if_locked<F>(&self, id: &str, lock_id: i32, change: F) -> SessionResult<bool>
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let key = self.record_key(id);
        let Some(guard) = self.lock_session(id).await? else {
            return Ok(false);
        };
        let result = self.rewrite_if_held(&key, lock_id, change).await;
        self.unlock(guard).await;
        result
    }

    async fn rewrite_if_held<F>(&self, key: &str, lock_id: i32, change: F) -> SessionResult<bool>
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let Some(mut record) = self.read_record(key).await? else {
            debug!(key = %key, lock_id, "Session not found, nothing to update");
            return Ok(false);
        };
        if !record.holds_lock(lock_id) {
            debug!(key = %key, lock_id, current = record.lock_id(), "Lock id mismatch, ignoring update");
            return Ok(false);
        }

        change(&mut record);
        write_record(self.backend.as_ref(), key, &record).await?;
        Ok(true)
    }

    async fn delete_if_held(&self, key: &str, lock_id: i32) -> SessionResult<bool> {
        match self.read_record(key).await? {
            Some(record) if record.holds_lock(lock_id) => {
                self.backend.commit(Batch::new().delete(key)).await?;
                Ok(true)
            }
            Some(record) => {
                debug!(key = %key, lock_id, current = record.lock_id(), "Lock id mismatch, ignoring removal");
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

impl SessionStateStore<RedisBackend> {
    /// Connect to Redis and create a store.
    pub async fn connect(config: RedisConfig, options: SessionStoreOptions) -> SessionResult<Self> {
        options.validate()?;
        let backend = RedisBackend::connect(config).await?;
        Self::new(Arc::new(backend), options)
    }
}

#[async_trait]
impl<B: SessionBackend + 'static> SessionStateProvider for SessionStateStore<B> {
    async fn create_uninitialized_item(&self, id: &str, timeout: i32) -> SessionResult<()> {
        debug!(session_id = %id, timeout, "Creating uninitialized session");
        let key = self.record_key(id);
        write_record(self.backend.as_ref(), &key, &SessionRecord::uninitialized(timeout)).await
    }

    async fn get_item(&self, id: &str) -> SessionResult<GetItemResult> {
        self.get(id, false).await
    }

    async fn get_item_exclusive(&self, id: &str) -> SessionResult<GetItemResult> {
        self.get(id, true).await
    }

    async fn release_item_exclusive(
        &self,
        id: &str,
        lock_id: i32,
        timeout: Option<i32>,
    ) -> SessionResult<()> {
        debug!(session_id = %id, lock_id, "Releasing session");
        let released = self
            .update_if_locked(id, lock_id, |record| {
                record.release_lock();
                if let Some(timeout) = timeout {
                    record.timeout = timeout;
                }
            })
            .await?;
        debug!(session_id = %id, lock_id, released, "Released session");
        Ok(())
    }

    async fn set_and_release_item_exclusive(
        &self,
        id: &str,
        data: &SessionData,
        lock_id: Option<i32>,
        is_new: bool,
    ) -> SessionResult<()> {
        debug!(session_id = %id, lock_id = ?lock_id, is_new, items = data.items.len(), "Storing session");

        if is_new {
            let key = self.record_key(id);
            let record = SessionRecord::new(data.items.clone(), data.timeout);
            return write_record(self.backend.as_ref(), &key, &record).await;
        }

        let Some(lock_id) = lock_id else {
            debug!(session_id = %id, "No lock id for existing session, nothing stored");
            return Ok(());
        };
        let stored = self
            .update_if_locked(id, lock_id, |record| {
                record.items = data.items.clone();
                record.release_lock();
                record.timeout = data.timeout;
            })
            .await?;
        debug!(session_id = %id, lock_id, stored, "Stored session");
        Ok(())
    }

    async fn remove_item(
        &self,
        id: &str,
        lock_id: i32,
        items: Option<&SessionItems>,
    ) -> SessionResult<()> {
        debug!(session_id = %id, lock_id, items = ?items.map(SessionItems::len), "Removing session");
        let key = self.record_key(id);

        let Some(guard) = self.lock_session(id).await? else {
            return Ok(());
        };
        let result = self.delete_if_held(&key, lock_id).await;
        self.unlock(guard).await;

        debug!(session_id = %id, lock_id, removed = ?result.as_ref().ok(), "Removed session");
        result.map(|_| ())
    }

    async fn reset_item_timeout(&self, id: &str, timeout: i32) -> SessionResult<()> {
        let key = self.record_key(id);
        let ttl = SessionRecord::new(SessionItems::new(), timeout).ttl();
        let replies = self.backend.commit(Batch::new().expire(&key, ttl)).await?;
        debug!(session_id = %id, timeout, refreshed = ?replies.first(), "Reset session timeout");
        Ok(())
    }
}

/// Builder for [`SessionStateStore`].
///
/// Each part may be configured once; a second call is reported as
/// [`SessionError::ConfigurationConflict`] by [`build`](Self::build).
pub struct SessionStateStoreBuilder<B> {
    backend: Option<Arc<B>>,
    options: Option<SessionStoreOptions>,
    conflict: Option<String>,
}

impl<B: SessionBackend + 'static> SessionStateStoreBuilder<B> {
    pub fn new() -> Self {
        Self {
            backend: None,
            options: None,
            conflict: None,
        }
    }

    /// Set the backend.
    pub fn backend(mut self, backend: Arc<B>) -> Self {
        if self.backend.is_some() {
            self.conflict
                .get_or_insert_with(|| "backend already configured".to_string());
        } else {
            self.backend = Some(backend);
        }
        self
    }

    /// Set the options.
    pub fn options(mut self, options: SessionStoreOptions) -> Self {
        if self.options.is_some() {
            self.conflict
                .get_or_insert_with(|| "options already configured".to_string());
        } else {
            self.options = Some(options);
        }
        self
    }

    /// Build the store.
    pub fn build(self) -> SessionResult<SessionStateStore<B>> {
        if let Some(conflict) = self.conflict {
            return Err(SessionError::ConfigurationConflict(conflict));
        }
        let backend = self
            .backend
            .ok_or_else(|| SessionError::Config("backend is required".to_string()))?;
        SessionStateStore::new(backend, self.options.unwrap_or_default())
    }
}

impl<B: SessionBackend + 'static> Default for SessionStateStoreBuilder<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::record::RecordLock;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn store() -> SessionStateStore<MemoryBackend> {
        SessionStateStore::builder()
            .backend(Arc::new(MemoryBackend::new()))
            .options(SessionStoreOptions::new("Harbour"))
            .build()
            .unwrap()
    }

    fn felix() -> SessionItems {
        let mut items = SessionItems::new();
        items.insert("name", "Felix");
        items
    }

    async fn put(store: &SessionStateStore<MemoryBackend>, id: &str, record: &SessionRecord) {
        write_record(store.backend().as_ref(), &store.record_key(id), record)
            .await
            .unwrap();
    }

    async fn get(store: &SessionStateStore<MemoryBackend>, id: &str) -> Option<SessionRecord> {
        store.read_record(&store.record_key(id)).await.unwrap()
    }

    fn locked_record(lock_id: i32, acquired_at: chrono::DateTime<chrono::Utc>) -> SessionRecord {
        let mut record = SessionRecord::new(felix(), 20);
        record.lock = Some(RecordLock {
            id: lock_id,
            acquired_at: ticks::truncate(acquired_at),
        });
        record
    }

    #[test]
    fn test_keys() {
        let store = store();
        assert_eq!(store.record_key("1234"), "Harbour/1234");
        assert_eq!(store.lock_key("1234"), "Harbour/1234/lock");

        let shared = SessionStateStore::new(Arc::new(MemoryBackend::new()), SessionStoreOptions::default()).unwrap();
        assert_eq!(shared.record_key("1234"), "AspNetSession/1234");
    }

    #[test]
    fn test_builder_rejects_second_configuration() {
        let err = SessionStateStore::builder()
            .backend(Arc::new(MemoryBackend::new()))
            .options(SessionStoreOptions::default())
            .options(SessionStoreOptions::new("other"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationConflict(_)));

        let err = SessionStateStore::builder()
            .backend(Arc::new(MemoryBackend::new()))
            .backend(Arc::new(MemoryBackend::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationConflict(_)));
    }

    #[test]
    fn test_builder_requires_backend_and_valid_options() {
        let err = SessionStateStoreBuilder::<MemoryBackend>::new().build().unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));

        let err = SessionStateStore::builder()
            .backend(Arc::new(MemoryBackend::new()))
            .options(SessionStoreOptions::default().with_key_separator(""))
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test]
    async fn test_uninitialized_then_exclusive() {
        let store = store();
        store.create_uninitialized_item("s1", 20).await.unwrap();

        let result = store.get_item_exclusive("s1").await.unwrap();
        let GetItemResult::Found { data, lock_id, actions } = result else {
            panic!("expected session data, got {result:?}");
        };
        assert!(data.items.is_empty());
        assert_eq!(data.timeout, 20);
        assert_eq!(lock_id, Some(1));
        assert_eq!(actions, SessionFlags::InitializeItem);

        let record = get(&store, "s1").await.unwrap();
        assert_eq!(record.flags, SessionFlags::None);
        assert!(record.holds_lock(1));
    }

    #[tokio::test]
    async fn test_exclusive_read_of_locked_record() {
        let store = store();
        store.create_uninitialized_item("s1", 20).await.unwrap();
        store.get_item_exclusive("s1").await.unwrap();

        let result = store.get_item_exclusive("s1").await.unwrap();
        assert!(matches!(result, GetItemResult::Locked { lock_id: 1, .. }));
    }

    #[tokio::test]
    async fn test_remove_is_fenced() {
        let store = store();
        put(&store, "s1", &locked_record(999, ticks::now())).await;

        store.remove_item("s1", 111, None).await.unwrap();
        assert!(get(&store, "s1").await.is_some());

        store.remove_item("s1", 999, Some(&felix())).await.unwrap();
        assert!(get(&store, "s1").await.is_none());
        assert!(!store.backend().exists(&store.record_key("s1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_unlocked_record_is_ignored() {
        let store = store();
        put(&store, "s1", &SessionRecord::new(felix(), 20)).await;
        store.remove_item("s1", 0, None).await.unwrap();
        assert!(get(&store, "s1").await.is_some());
    }

    #[tokio::test]
    async fn test_new_session_is_stored_unlocked() {
        let store = store();
        store
            .set_and_release_item_exclusive("s1", &SessionData::new(felix(), 20), None, true)
            .await
            .unwrap();

        let record = get(&store, "s1").await.unwrap();
        assert!(!record.is_locked());
        assert_eq!(record.flags, SessionFlags::None);

        let result = store.get_item("s1").await.unwrap();
        assert_eq!(result.data().map(|d| &d.items), Some(&felix()));
        assert!(!result.is_locked());
        assert!(!get(&store, "s1").await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_shared_read_of_locked_record() {
        let store = store();
        let record = locked_record(7, ticks::now() - TimeDelta::hours(1));
        put(&store, "s1", &record).await;

        let result = store.get_item("s1").await.unwrap();
        let GetItemResult::Locked { lock_id, lock_age, .. } = result else {
            panic!("expected a locked result, got {result:?}");
        };
        assert_eq!(lock_id, 7);
        assert!((lock_age - TimeDelta::hours(1)).abs() < TimeDelta::seconds(10));
        assert_eq!(get(&store, "s1").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = store();
        assert_eq!(store.get_item("nope").await.unwrap(), GetItemResult::NotFound);
        assert_eq!(
            store.get_item_exclusive("nope").await.unwrap(),
            GetItemResult::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_and_release_updates_and_unlocks() {
        let store = store();
        put(&store, "s1", &SessionRecord::new(SessionItems::new(), 20)).await;
        let lock_id = store.get_item_exclusive("s1").await.unwrap().lock_id().unwrap();

        store
            .set_and_release_item_exclusive("s1", &SessionData::new(felix(), 45), Some(lock_id), false)
            .await
            .unwrap();

        let record = get(&store, "s1").await.unwrap();
        assert!(!record.is_locked());
        assert_eq!(record.items, felix());
        assert_eq!(record.timeout, 45);
        assert_eq!(
            store.backend().ttl(&store.record_key("s1")).await.unwrap(),
            Some(Duration::from_secs(45 * 60))
        );
    }

    #[tokio::test]
    async fn test_date_outside_tick_range_is_not_stored() {
        let store = store();
        for date in [
            chrono::DateTime::<chrono::Utc>::MAX_UTC,
            ticks::min_value() - TimeDelta::days(365),
        ] {
            let mut items = felix();
            items.insert("born", date);
            let err = store
                .set_and_release_item_exclusive("s1", &SessionData::new(items, 20), None, true)
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Serialization(_)), "{date}: {err:?}");
            assert!(get(&store, "s1").await.is_none());
        }

        put(&store, "s2", &SessionRecord::new(SessionItems::new(), 20)).await;
        let lock_id = store.get_item_exclusive("s2").await.unwrap().lock_id().unwrap();
        let mut items = felix();
        items.insert("born", chrono::DateTime::<chrono::Utc>::MAX_UTC);
        let err = store
            .set_and_release_item_exclusive("s2", &SessionData::new(items, 20), Some(lock_id), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Serialization(_)));
        assert!(get(&store, "s2").await.unwrap().holds_lock(lock_id));
        assert!(!store.backend().exists(&store.lock_key("s2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_and_release_with_wrong_lock_id_is_ignored() {
        let store = store();
        let original = locked_record(3, ticks::now());
        put(&store, "s1", &original).await;

        let mut other = SessionItems::new();
        other.insert("name", "Oscar");
        store
            .set_and_release_item_exclusive("s1", &SessionData::new(other.clone(), 5), Some(4), false)
            .await
            .unwrap();
        store
            .set_and_release_item_exclusive("s1", &SessionData::new(other, 5), None, false)
            .await
            .unwrap();

        assert_eq!(get(&store, "s1").await.unwrap(), original);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_fenced() {
        let store = store();
        let key = store.record_key("s1");
        put(&store, "s1", &locked_record(2, ticks::now())).await;

        store.release_item_exclusive("s1", 1, Some(90)).await.unwrap();
        assert!(get(&store, "s1").await.unwrap().holds_lock(2));
        assert_eq!(
            store.backend().ttl(&key).await.unwrap(),
            Some(Duration::from_secs(20 * 60))
        );

        store.release_item_exclusive("s1", 2, Some(90)).await.unwrap();
        let record = get(&store, "s1").await.unwrap();
        assert!(!record.is_locked());
        assert_eq!(record.timeout, 90);
        assert_eq!(
            store.backend().ttl(&key).await.unwrap(),
            Some(Duration::from_secs(90 * 60))
        );

        store.release_item_exclusive("s1", 2, None).await.unwrap();
        assert_eq!(get(&store, "s1").await.unwrap(), record);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_refreshes_ttl() {
        let store = store();
        let key = store.record_key("s1");
        put(&store, "s1", &SessionRecord::new(felix(), 80)).await;

        tokio::time::advance(Duration::from_secs(600)).await;
        store.get_item("s1").await.unwrap();

        assert_eq!(
            store.backend().ttl(&key).await.unwrap(),
            Some(Duration::from_secs(80 * 60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_timeout_only_touches_ttl() {
        let store = store();
        let key = store.record_key("s1");
        let record = SessionRecord::new(felix(), 20);
        put(&store, "s1", &record).await;

        store.reset_item_timeout("s1", 30).await.unwrap();
        assert_eq!(
            store.backend().ttl(&key).await.unwrap(),
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(get(&store, "s1").await.unwrap(), record);

        store.reset_item_timeout("missing", 30).await.unwrap();
        assert!(!store.backend().exists(&store.record_key("missing")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_timeout() {
        let store = store();
        store.create_uninitialized_item("s1", 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get_item("s1").await.unwrap(), GetItemResult::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_lock_reports_unavailable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let store = SessionStateStore::new(
            Arc::new(MemoryBackend::new()),
            SessionStoreOptions::new("Harbour")
                .with_lock_hold_duration(Duration::from_secs(30))
                .on_lock_not_acquired(move |id| {
                    assert_eq!(id, "s1");
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
        put(&store, "s1", &SessionRecord::new(felix(), 20)).await;

        let held = store
            .backend()
            .try_claim(&store.lock_key("s1"), "other-process", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(held);

        assert_eq!(
            store.get_item("s1").await.unwrap(),
            GetItemResult::LockUnavailable
        );
        store.remove_item("s1", 1, None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(get(&store, "s1").await.is_some());
    }

    #[tokio::test]
    async fn test_distributed_lock_released_after_each_operation() {
        let store = store();
        let lock_key = store.lock_key("s1");

        store.get_item("s1").await.unwrap();
        assert!(!store.backend().exists(&lock_key).await.unwrap());

        put(&store, "s1", &locked_record(5, ticks::now())).await;
        store.get_item("s1").await.unwrap();
        assert!(!store.backend().exists(&lock_key).await.unwrap());

        store.release_item_exclusive("s1", 5, None).await.unwrap();
        store.remove_item("s1", 5, None).await.unwrap();
        assert!(!store.backend().exists(&lock_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let store = store();
        let key = store.record_key("s1");
        let mut fields = SessionRecord::new(felix(), 20).to_fields().unwrap();
        fields.retain(|(name, _)| name != "items");
        fields.push(("items".to_string(), vec![1, 0, 0, 0]));
        store.backend().set_fields(&key, &fields).await.unwrap();

        let err = store.get_item("s1").await.unwrap_err();
        assert!(matches!(err, SessionError::CorruptRecord(_)));
        assert!(!store.backend().exists(&store.lock_key("s1")).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_exclusive_reader_wins() {
        let store = Arc::new(store());
        store.create_uninitialized_item("s1", 20).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move { store.get_item_exclusive("s1").await }));
        }

        let mut found = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                GetItemResult::Found { lock_id, .. } => {
                    assert_eq!(lock_id, Some(1));
                    found += 1;
                }
                GetItemResult::Locked { lock_id, .. } => assert_eq!(lock_id, 1),
                GetItemResult::LockUnavailable => {}
                other => panic!("unexpected result {other:?}"),
            }
        }
        assert_eq!(found, 1);
    }

    #[test]
    fn test_provider_defaults() {
        let store = store();
        assert!(!store.set_item_expire_callback());
        assert_eq!(store.create_new_store_data(15), SessionData::empty(15));
    }
}
