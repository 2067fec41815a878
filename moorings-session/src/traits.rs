//! Session provider traits and result types.

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::error::SessionResult;
use crate::items::SessionItems;
use crate::record::SessionFlags;

/// Session items together with their timeout, as handed to the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionData {
    pub items: SessionItems,
    /// Idle timeout in minutes
    pub timeout: i32,
}

impl SessionData {
    pub fn new(items: SessionItems, timeout: i32) -> Self {
        Self { items, timeout }
    }

    /// Empty data with the given timeout.
    pub fn empty(timeout: i32) -> Self {
        Self::new(SessionItems::new(), timeout)
    }
}

/// Outcome of reading a session.
#[derive(Debug, Clone, PartialEq)]
pub enum GetItemResult {
    /// The distributed lock was busy. Nothing was read; try again.
    LockUnavailable,
    /// No record for this id.
    NotFound,
    /// Another request holds the record lock. The record was not changed.
    Locked {
        lock_id: i32,
        lock_age: TimeDelta,
        actions: SessionFlags,
    },
    /// The record was read. `lock_id` is set for exclusive reads.
    Found {
        data: SessionData,
        lock_id: Option<i32>,
        actions: SessionFlags,
    },
}

impl GetItemResult {
    /// `true` if the record is locked, by another request or by this read.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            Self::Locked { .. }
                | Self::Found {
                    lock_id: Some(_),
                    ..
                }
        )
    }

    pub fn lock_id(&self) -> Option<i32> {
        match self {
            Self::Locked { lock_id, .. } => Some(*lock_id),
            Self::Found { lock_id, .. } => *lock_id,
            _ => None,
        }
    }

    pub fn actions(&self) -> Option<SessionFlags> {
        match self {
            Self::Locked { actions, .. } | Self::Found { actions, .. } => Some(*actions),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&SessionData> {
        match self {
            Self::Found { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<SessionData> {
        match self {
            Self::Found { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Per-request session state operations, as called by a host framework.
///
/// A request either reads shared (`get_item`) or takes the record lock
/// (`get_item_exclusive`) and later hands the returned lock id back to
/// `set_and_release_item_exclusive`, `release_item_exclusive` or
/// `remove_item`. Those fenced calls do nothing unless the record is still
/// locked under that id.
#[async_trait]
pub trait SessionStateProvider: Send + Sync {
    /// Called at the start of each request.
    async fn initialize_request(&self) {}

    /// Called at the end of each request.
    async fn end_request(&self) {}

    /// Fresh, empty data for a new session.
    fn create_new_store_data(&self, timeout: i32) -> SessionData {
        SessionData::empty(timeout)
    }

    /// Expiry notifications are not supported; always `false`.
    fn set_item_expire_callback(&self) -> bool {
        false
    }

    /// Store an empty placeholder record whose first reader gets empty items.
    async fn create_uninitialized_item(&self, id: &str, timeout: i32) -> SessionResult<()>;

    /// Read a session without taking the record lock.
    async fn get_item(&self, id: &str) -> SessionResult<GetItemResult>;

    /// Read a session and take the record lock.
    async fn get_item_exclusive(&self, id: &str) -> SessionResult<GetItemResult>;

    /// Unlock the record, optionally replacing its timeout.
    async fn release_item_exclusive(
        &self,
        id: &str,
        lock_id: i32,
        timeout: Option<i32>,
    ) -> SessionResult<()>;

    /// Store items and unlock. A new session is written unconditionally.
    async fn set_and_release_item_exclusive(
        &self,
        id: &str,
        data: &SessionData,
        lock_id: Option<i32>,
        is_new: bool,
    ) -> SessionResult<()>;

    /// Delete the record.
    async fn remove_item(
        &self,
        id: &str,
        lock_id: i32,
        items: Option<&SessionItems>,
    ) -> SessionResult<()>;

    /// Restart the record's idle timer without reading it.
    async fn reset_item_timeout(&self, id: &str, timeout: i32) -> SessionResult<()>;
}
