//! Single-shot timers on the runtime's clock.
//!
//! Every timer owner (DC cleanup, query retry/timeout, ack flush) re-arms
//! the same [`Timer`] value; starting replaces the previous schedule and
//! `cancel` is idempotent.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Default)]
pub struct Timer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run after `seconds`. Replaces any pending schedule.
    pub fn start<F>(&self, seconds: f64, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = Duration::from_secs_f64(seconds.max(0.0));
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(previous) = self.handle.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Drop the pending schedule, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::new();
        let f = fired.clone();
        timer.start(5.0, async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_restart_replaces() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = Timer::new();

        let f = fired.clone();
        timer.start(1.0, async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        timer.cancel();

        let f = fired.clone();
        timer.start(2.0, async move {
            f.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }
}
