use futures::future::BoxFuture;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use crate::ports::Scheduler;

/// Runs each task on the tokio runtime after its delay.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, after: Duration, task: BoxFuture<'static, ()>) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            task.await;
        });
    }
}

/// Holds scheduled tasks until a test runs them.
#[cfg(test)]
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, BoxFuture<'static, ()>)>>,
}

#[cfg(test)]
impl ManualScheduler {
    /// Delays of the tasks still waiting, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .map(|pending| pending.iter().map(|(after, _)| *after).collect())
            .unwrap_or_default()
    }

    /// Runs the oldest pending task. Returns false when nothing was scheduled.
    pub async fn run_next(&self) -> bool {
        let next = match self.pending.lock() {
            Ok(mut pending) if !pending.is_empty() => Some(pending.remove(0)),
            _ => None,
        };

        match next {
            Some((_, task)) => {
                task.await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
impl Scheduler for ManualScheduler {
    fn schedule(&self, after: Duration, task: BoxFuture<'static, ()>) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push((after, task));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_waits_for_the_delay() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        TokioScheduler.schedule(
            Duration::from_secs(60),
            Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
        );

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!ran.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn manual_scheduler_runs_in_order() {
        let scheduler = ManualScheduler::default();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        scheduler.schedule(Duration::from_secs(5), Box::pin(async move { flag.store(true, Ordering::SeqCst) }));

        assert_eq!(scheduler.delays(), vec![Duration::from_secs(5)]);
        assert!(scheduler.run_next().await);
        assert!(ran.load(Ordering::SeqCst));
        assert!(!scheduler.run_next().await);
    }
}
