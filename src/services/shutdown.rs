use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Process-wide stop signal. Clones share one trigger, and waiting after the trigger
/// returns immediately.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleeps for `duration` unless the signal fires first. Returns false when cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.triggered() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_runs_to_completion_without_trigger() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_secs(30)).await);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn trigger_cuts_sleeps_short_for_every_clone() {
        let shutdown = Shutdown::new();
        let sleeper = shutdown.clone();
        let sleeping = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(3600)).await });

        tokio::task::yield_now().await;
        shutdown.trigger();

        let completed = tokio::time::timeout(Duration::from_secs(1), sleeping)
            .await
            .expect("sleep was not interrupted")
            .unwrap();
        assert!(!completed);
        // Already triggered: returns at once.
        assert!(!shutdown.clone().sleep(Duration::from_secs(3600)).await);
    }
}
