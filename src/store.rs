use crate::forwardtest::ForwardTest;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Result of a versioned save.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(ForwardTest),
    /// The stored version no longer matches the one that was loaded.
    VersionMismatch,
}

/// Durable storage for forward tests. Saves are checked against `ForwardTest::version`
/// so a concurrent writer can never silently overwrite another one.
#[async_trait]
pub trait ForwardtestStore: Send + Sync {
    /// Persists a new forward test and returns it as stored (version 1).
    async fn create(&self, forwardtest: &ForwardTest) -> Result<ForwardTest>;

    async fn read(&self, id: Uuid) -> Result<Option<ForwardTest>>;

    /// Replaces the stored forward test when its version still equals `forwardtest.version`.
    async fn update(&self, forwardtest: &ForwardTest) -> Result<UpdateOutcome>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// All forward tests, newest first.
    async fn list(&self) -> Result<Vec<ForwardTest>>;
}

/// `updated_at` for a save: now, but strictly after the previous value even when the
/// wall clock did not move.
pub fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::microseconds(1);
    if now > floor {
        now
    } else {
        floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn updated_at_is_strictly_increasing() {
        let previous = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(
            next_updated_at(previous, previous),
            previous + Duration::microseconds(1)
        );
        assert_eq!(
            next_updated_at(previous, previous - Duration::seconds(5)),
            previous + Duration::microseconds(1)
        );
        let later = previous + Duration::seconds(2);
        assert_eq!(next_updated_at(previous, later), later);
    }
}
