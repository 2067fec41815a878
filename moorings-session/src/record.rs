//! The stored session record and its hash-field layout.
//!
//! A record is a hash with exactly seven binary fields. Integers are
//! little-endian and timestamps are ticks (see [`crate::ticks`]). The two
//! lock fields are empty while the record is unlocked.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::codec::{date_ticks, decode_items, encode_items};
use crate::error::{SessionError, SessionResult};
use crate::items::SessionItems;
use crate::ticks;

pub const FIELD_CREATED: &str = "created";
pub const FIELD_LOCKED: &str = "locked";
pub const FIELD_LOCK_ID: &str = "lockId";
pub const FIELD_LOCK_DATE: &str = "lockDate";
pub const FIELD_TIMEOUT: &str = "timeout";
pub const FIELD_FLAGS: &str = "flags";
pub const FIELD_ITEMS: &str = "items";

/// All record fields, in write order.
pub const RECORD_FIELDS: [&str; 7] = [
    FIELD_CREATED,
    FIELD_LOCKED,
    FIELD_LOCK_ID,
    FIELD_LOCK_DATE,
    FIELD_TIMEOUT,
    FIELD_FLAGS,
    FIELD_ITEMS,
];

/// What the next reader of a record has to do with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SessionFlags {
    /// Nothing pending.
    #[default]
    None = 0,
    /// Created uninitialized; the first reader sees empty items.
    InitializeItem = 1,
    Uninitialized = 2,
}

impl SessionFlags {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::InitializeItem),
            2 => Some(Self::Uninitialized),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Exclusive record lock held by one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLock {
    pub id: i32,
    pub acquired_at: DateTime<Utc>,
}

/// One session as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub created: DateTime<Utc>,
    pub lock: Option<RecordLock>,
    /// Idle lifetime in minutes; also the key's TTL.
    pub timeout: i32,
    pub flags: SessionFlags,
    pub items: SessionItems,
}

impl SessionRecord {
    /// A fresh, unlocked record created now.
    pub fn new(items: SessionItems, timeout: i32) -> Self {
        Self {
            created: ticks::now(),
            lock: None,
            timeout,
            flags: SessionFlags::None,
            items,
        }
    }

    /// A placeholder record whose first reader gets empty items.
    pub fn uninitialized(timeout: i32) -> Self {
        Self {
            flags: SessionFlags::InitializeItem,
            ..Self::new(SessionItems::new(), timeout)
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Current lock id, 0 when unlocked.
    pub fn lock_id(&self) -> i32 {
        self.lock.map_or(0, |lock| lock.id)
    }

    /// Lock acquisition time, the tick origin when unlocked.
    pub fn lock_date(&self) -> DateTime<Utc> {
        self.lock.map_or_else(ticks::min_value, |lock| lock.acquired_at)
    }

    /// How long the current lock has been held.
    pub fn lock_age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.lock.map(|lock| now - lock.acquired_at)
    }

    /// `true` if the record is locked under `lock_id`.
    pub fn holds_lock(&self, lock_id: i32) -> bool {
        matches!(self.lock, Some(lock) if lock.id == lock_id)
    }

    /// Lock the record with the next id and return that id.
    ///
    /// Ids only increase while the record stays locked. The stored lock id
    /// is empty once a record is released, so every lock taken on an
    /// unlocked record is id 1 and ids are reused across lock cycles. A
    /// delayed release carrying an id from an earlier cycle can therefore
    /// unlock a later holder.
    pub fn acquire_lock(&mut self, now: DateTime<Utc>) -> i32 {
        let id = self.lock_id().checked_add(1).unwrap_or(1);
        self.lock = Some(RecordLock {
            id,
            acquired_at: ticks::truncate(now),
        });
        id
    }

    pub fn release_lock(&mut self) {
        self.lock = None;
    }

    /// Key TTL matching the timeout. Negative timeouts expire immediately.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.timeout).unwrap_or(0) * 60)
    }

    /// Serialize into hash fields.
    pub fn to_fields(&self) -> SessionResult<Vec<(String, Vec<u8>)>> {
        let (lock_id, lock_date) = match self.lock {
            Some(lock) => (
                lock.id.to_le_bytes().to_vec(),
                date_ticks(&lock.acquired_at)?.to_le_bytes().to_vec(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(vec![
            (
                FIELD_CREATED.to_string(),
                date_ticks(&self.created)?.to_le_bytes().to_vec(),
            ),
            (FIELD_LOCKED.to_string(), vec![u8::from(self.is_locked())]),
            (FIELD_LOCK_ID.to_string(), lock_id),
            (FIELD_LOCK_DATE.to_string(), lock_date),
            (FIELD_TIMEOUT.to_string(), self.timeout.to_le_bytes().to_vec()),
            (FIELD_FLAGS.to_string(), self.flags.as_i32().to_le_bytes().to_vec()),
            (FIELD_ITEMS.to_string(), encode_items(&self.items)?),
        ])
    }

    /// Parse hash fields.
    ///
    /// Returns `Ok(None)` unless the hash holds exactly the seven record
    /// fields, which covers both a missing key and a foreign value. Fields
    /// that are present but malformed are a [`SessionError::CorruptRecord`].
    pub fn from_fields(fields: &HashMap<String, Vec<u8>>) -> SessionResult<Option<Self>> {
        if fields.len() != RECORD_FIELDS.len()
            || !RECORD_FIELDS.iter().all(|name| fields.contains_key(*name))
        {
            return Ok(None);
        }
        let field = |name: &str| fields.get(name).map(Vec::as_slice).unwrap_or_default();

        let created = read_date(field(FIELD_CREATED), FIELD_CREATED)?;
        let locked = match field(FIELD_LOCKED) {
            [flag] => *flag != 0,
            other => return Err(width_error(FIELD_LOCKED, 1, other.len())),
        };
        let lock_id = match field(FIELD_LOCK_ID) {
            [] => 0,
            bytes => i32::from_le_bytes(fixed(bytes, FIELD_LOCK_ID)?),
        };
        let lock_date = match field(FIELD_LOCK_DATE) {
            [] => ticks::min_value(),
            bytes => read_date(bytes, FIELD_LOCK_DATE)?,
        };
        let timeout = i32::from_le_bytes(fixed(field(FIELD_TIMEOUT), FIELD_TIMEOUT)?);
        let raw_flags = i32::from_le_bytes(fixed(field(FIELD_FLAGS), FIELD_FLAGS)?);
        let flags = SessionFlags::from_i32(raw_flags)
            .ok_or_else(|| SessionError::corrupt(format!("unknown session flags {raw_flags}")))?;
        let items = decode_items(field(FIELD_ITEMS))?;

        Ok(Some(Self {
            created,
            lock: locked.then_some(RecordLock {
                id: lock_id,
                acquired_at: lock_date,
            }),
            timeout,
            flags,
            items,
        }))
    }
}

fn width_error(name: &str, expected: usize, found: usize) -> SessionError {
    SessionError::corrupt(format!("field '{name}' is {found} bytes, expected {expected}"))
}

fn fixed<const N: usize>(bytes: &[u8], name: &str) -> SessionResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| width_error(name, N, bytes.len()))
}

fn read_date(bytes: &[u8], name: &str) -> SessionResult<DateTime<Utc>> {
    let raw = i64::from_le_bytes(fixed(bytes, name)?);
    ticks::from_ticks(raw)
        .ok_or_else(|| SessionError::corrupt(format!("field '{name}' has out-of-range ticks {raw}")))
}
