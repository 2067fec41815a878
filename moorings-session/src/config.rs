//! Session store configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{SessionError, SessionResult};

/// Called with the session id when the distributed lock could not be taken.
pub type LockNotAcquiredHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Session store configuration.
///
/// Record keys are `{name}{key_separator}{id}`; the distributed lock for a
/// record lives at `{record key}{key_separator}lock`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStoreOptions {
    /// Application name, the first key segment
    pub name: String,
    /// Separator between key segments
    pub key_separator: String,
    /// How long to wait for the distributed lock
    #[serde(with = "duration_millis")]
    pub lock_acquisition_timeout: Duration,
    /// Server-side expiry of the distributed lock
    #[serde(with = "duration_millis")]
    pub lock_hold_duration: Duration,
    #[serde(skip)]
    on_lock_not_acquired: Option<LockNotAcquiredHandler>,
}

/// Application name used by existing deployments of the record format.
pub const DEFAULT_NAME: &str = "AspNetSession";

impl Default for SessionStoreOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            key_separator: "/".to_string(),
            lock_acquisition_timeout: Duration::from_secs(1),
            lock_hold_duration: Duration::from_secs(1),
            on_lock_not_acquired: None,
        }
    }
}

impl fmt::Debug for SessionStoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStoreOptions")
            .field("name", &self.name)
            .field("key_separator", &self.key_separator)
            .field("lock_acquisition_timeout", &self.lock_acquisition_timeout)
            .field("lock_hold_duration", &self.lock_hold_duration)
            .field("on_lock_not_acquired", &self.on_lock_not_acquired.is_some())
            .finish()
    }
}

impl SessionStoreOptions {
    /// Options with the given application name and defaults otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load options from environment variables.
    ///
    /// Reads `MOORINGS_SESSION_NAME`, `MOORINGS_SESSION_KEY_SEPARATOR`,
    /// `MOORINGS_SESSION_LOCK_ACQUISITION_TIMEOUT_MS` and
    /// `MOORINGS_SESSION_LOCK_HOLD_MS`. Unset variables keep their defaults.
    pub fn from_env() -> SessionResult<Self> {
        let mut options = Self::default();

        if let Ok(name) = std::env::var("MOORINGS_SESSION_NAME") {
            options.name = name;
        }
        if let Ok(separator) = std::env::var("MOORINGS_SESSION_KEY_SEPARATOR") {
            options.key_separator = separator;
        }
        if let Some(timeout) = env_millis("MOORINGS_SESSION_LOCK_ACQUISITION_TIMEOUT_MS")? {
            options.lock_acquisition_timeout = timeout;
        }
        if let Some(hold) = env_millis("MOORINGS_SESSION_LOCK_HOLD_MS")? {
            options.lock_hold_duration = hold;
        }

        options.validate()?;
        Ok(options)
    }

    /// Set the application name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the key separator.
    pub fn with_key_separator(mut self, separator: impl Into<String>) -> Self {
        self.key_separator = separator.into();
        self
    }

    /// Set how long to wait for the distributed lock.
    pub fn with_lock_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquisition_timeout = timeout;
        self
    }

    /// Set the distributed lock's server-side expiry.
    pub fn with_lock_hold_duration(mut self, hold: Duration) -> Self {
        self.lock_hold_duration = hold;
        self
    }

    /// Set the lock-not-acquired callback. Without one, a warning is logged.
    pub fn on_lock_not_acquired<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_lock_not_acquired = Some(Arc::new(handler));
        self
    }

    /// Report that the lock for `session_id` was not acquired.
    pub(crate) fn notify_lock_not_acquired(&self, session_id: &str) {
        match &self.on_lock_not_acquired {
            Some(handler) => handler(session_id),
            None => warn!(
                session_id = %session_id,
                timeout = ?self.lock_acquisition_timeout,
                "Session lock not acquired"
            ),
        }
    }

    /// Validate the options.
    pub fn validate(&self) -> SessionResult<()> {
        if self.name.is_empty() {
            return Err(SessionError::Config("name must not be empty".to_string()));
        }
        if self.key_separator.is_empty() {
            return Err(SessionError::Config(
                "key_separator must not be empty".to_string(),
            ));
        }
        if self.lock_acquisition_timeout.is_zero() {
            return Err(SessionError::Config(
                "lock_acquisition_timeout must be greater than zero".to_string(),
            ));
        }
        if self.lock_hold_duration.is_zero() {
            return Err(SessionError::Config(
                "lock_hold_duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_millis(var: &str) -> SessionResult<Option<Duration>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| SessionError::Config(format!("{var} must be a number of milliseconds, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let options = SessionStoreOptions::default();
        assert_eq!(options.name, "AspNetSession");
        assert_eq!(options.key_separator, "/");
        assert_eq!(options.lock_acquisition_timeout, Duration::from_secs(1));
        assert_eq!(options.lock_hold_duration, Duration::from_secs(1));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(SessionStoreOptions::new("").validate().is_err());
        assert!(
            SessionStoreOptions::new("Harbour")
                .with_key_separator("")
                .validate()
                .is_err()
        );
        assert!(
            SessionStoreOptions::new("Harbour")
                .with_lock_acquisition_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            SessionStoreOptions::new("Harbour")
                .with_lock_hold_duration(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let options: SessionStoreOptions =
            serde_json::from_str(r#"{"name": "Harbour", "lock_hold_duration": 2500}"#).unwrap();
        assert_eq!(options.name, "Harbour");
        assert_eq!(options.key_separator, "/");
        assert_eq!(options.lock_hold_duration, Duration::from_millis(2500));
        assert_eq!(options.lock_acquisition_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_lock_not_acquired_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let options = SessionStoreOptions::default().on_lock_not_acquired(move |id| {
            assert_eq!(id, "1234");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        options.notify_lock_not_acquired("1234");
        options.clone().notify_lock_not_acquired("1234");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(format!("{options:?}").contains("on_lock_not_acquired: true"));
    }
}
