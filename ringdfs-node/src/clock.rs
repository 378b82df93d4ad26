use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The current unix timestamp in milliseconds.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
/// A wall clock which never hands out the same timestamp twice.
///
/// File versions are compared by timestamp, two writes issued by the
/// same node within one millisecond still order correctly.
pub struct Clock {
    last: Arc<AtomicU64>,
}

impl Clock {
    /// Gets the next timestamp in milliseconds.
    pub fn get_time(&self) -> u64 {
        let now = timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock() {
        let clock = Clock::default();

        let ts1 = clock.get_time();
        let ts2 = clock.get_time();
        let ts3 = clock.clone().get_time();
        assert!(ts1 < ts2);
        assert!(ts2 < ts3);
        assert!(ts1 + 10_000 > timestamp_millis());
    }
}
