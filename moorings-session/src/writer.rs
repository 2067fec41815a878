//! Atomic record writes.

use tracing::trace;

use crate::backend::{Batch, SessionBackend};
use crate::error::{SessionError, SessionResult};
use crate::record::SessionRecord;

/// Write all record fields and reset the key's TTL to the record timeout in
/// one atomic batch. Readers never see the new fields with the old TTL.
pub async fn write_record<B>(backend: &B, key: &str, record: &SessionRecord) -> SessionResult<()>
where
    B: SessionBackend + ?Sized,
{
    let ttl = record.ttl();
    let batch = Batch::new()
        .set_fields(key, record.to_fields()?)
        .expire(key, ttl);

    trace!(key = %key, ttl = ?ttl, locked = record.is_locked(), "Writing session record");
    match backend.commit(batch).await?.as_slice() {
        [_, true] => Ok(()),
        [_, false] => Err(SessionError::PartialWrite(format!(
            "fields written to '{key}' but its TTL was not set"
        ))),
        replies => Err(SessionError::Store(format!(
            "expected 2 replies writing '{key}', got {}",
            replies.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::items::SessionItems;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_fields_and_ttl_written_together() {
        let backend = MemoryBackend::new();
        let record = SessionRecord::new(SessionItems::new(), 20);

        write_record(&backend, "app/1", &record).await.unwrap();

        assert_eq!(backend.get_all_fields("app/1").await.unwrap().len(), 7);
        assert_eq!(
            backend.ttl("app/1").await.unwrap(),
            Some(Duration::from_secs(20 * 60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_resets_ttl() {
        let backend = MemoryBackend::new();
        let mut record = SessionRecord::new(SessionItems::new(), 20);
        write_record(&backend, "app/1", &record).await.unwrap();

        tokio::time::advance(Duration::from_secs(600)).await;
        record.timeout = 5;
        write_record(&backend, "app/1", &record).await.unwrap();

        assert_eq!(
            backend.ttl("app/1").await.unwrap(),
            Some(Duration::from_secs(5 * 60))
        );
    }
}
