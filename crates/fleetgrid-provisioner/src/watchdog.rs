//! Hang detection for the provisioning loop.
//!
//! A wedged iteration (a cloud call that never returns, a deadlock) would
//! otherwise leave the process alive but useless. The watchdog is a
//! background task that expects a touch within every timeout window and
//! runs a caller-supplied expiry action when one does not arrive. The
//! daemon installs an action that exits the process so the supervisor
//! restarts it.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

pub struct Watchdog {
    touch_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn the watchdog task. `on_expiry` runs at most once, on the
    /// first missed window.
    pub fn spawn(timeout: Duration, on_expiry: Box<dyn FnOnce() + Send>) -> Self {
        let (touch_tx, mut touch_rx) = watch::channel(());
        let handle = tokio::spawn(async move {
            loop {
                match tokio::time::timeout(timeout, touch_rx.changed()).await {
                    // Touched in time; arm the next window.
                    Ok(Ok(())) => {}
                    // Sender dropped: the watchdog was stopped.
                    Ok(Err(_)) => return,
                    Err(_) => {
                        error!(
                            timeout_secs = timeout.as_secs(),
                            "watchdog expired, no loop progress"
                        );
                        on_expiry();
                        return;
                    }
                }
            }
        });
        Self { touch_tx, handle }
    }

    /// Signal that the loop is making progress.
    pub fn touch(&self) {
        let _ = self.touch_tx.send(());
    }

    /// Stop the watchdog without firing the expiry action.
    pub fn stop(self) {
        // Dropping the sender ends the task cleanly; abort in case it is
        // mid-await on the timeout.
        drop(self.touch_tx);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn fires_when_not_touched() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _dog = Watchdog::spawn(
            Duration::from_millis(20),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stays_quiet_while_touched() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let dog = Watchdog::spawn(
            Duration::from_millis(50),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            dog.touch();
        }
        assert!(!fired.load(Ordering::SeqCst));
        dog.stop();
    }

    #[tokio::test]
    async fn stop_suppresses_expiry() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let dog = Watchdog::spawn(
            Duration::from_millis(20),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        dog.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
