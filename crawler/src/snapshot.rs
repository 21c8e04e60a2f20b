//! Cadence-based store snapshots, with a forced save on shutdown.

use std::time::{Duration, Instant};

use crate::store::{Store, StoreError};

#[derive(Debug)]
pub struct Snapshot {
    interval: Duration,
    last_save: Instant,
}

impl Snapshot {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_save: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.last_save.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.elapsed())
    }

    /// Whether the cadence has come around again.
    pub fn saveable(&self) -> bool {
        self.elapsed() >= self.interval
    }

    /// Snapshot when due (or forced). Returns whether a save happened.
    pub async fn save(&mut self, store: &Store, force: bool) -> Result<bool, StoreError> {
        if !force && !self.saveable() {
            return Ok(false);
        }
        store.snapshot().await?;
        self.last_save = Instant::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saveable_follows_the_interval() {
        let snapshot = Snapshot::new(Duration::from_secs(3600));
        assert!(!snapshot.saveable());
        assert!(snapshot.remaining() <= Duration::from_secs(3600));

        let due = Snapshot::new(Duration::ZERO);
        assert!(due.saveable());
        assert_eq!(due.remaining(), Duration::ZERO);
    }
}
