use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

/// Remembers when a socket last sent anything.
///
/// Outgoing traffic refreshes a NAT mapping just like a keep-alive does, so the
/// keep-alive loop can defer itself while the socket is busy.
#[derive(Clone, Default)]
pub struct WriteTracker {
    last_write: Arc<Mutex<Option<Instant>>>,
}

impl WriteTracker {
    pub fn new() -> WriteTracker {
        WriteTracker::default()
    }
    pub fn record_write(&self) {
        self.last_write.lock().replace(Instant::now());
    }
    pub fn last_write(&self) -> Option<Instant> {
        *self.last_write.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::WriteTracker;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn tracks_latest_write() {
        let tracker = WriteTracker::new();
        assert!(tracker.last_write().is_none());
        tracker.record_write();
        let first = tracker.last_write().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        tracker.clone().record_write();
        assert_eq!(tracker.last_write().unwrap() - first, Duration::from_secs(5));
    }
}
