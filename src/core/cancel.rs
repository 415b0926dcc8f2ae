use crate::utils::error::{OrchestratorError, Result};
use std::time::Duration;
use tokio::sync::watch;

/// Sending half, held by whoever may abort the run (Ctrl-C handler, tests).
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Shared cancellation signal checked by every poll loop and backoff sleep.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// 永遠不會被取消的信號
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(OrchestratorError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let (_handle, signal) = cancel_pair();
        let start = Instant::now();
        signal.sleep(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let (handle, signal) = cancel_pair();
        let start = Instant::now();

        let sleeper = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        let result = sleeper.await.unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(signal.is_cancelled());
        assert!(handle.signal().is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_pending_waiter() {
        let (handle, signal) = cancel_pair();
        let mut waiter = task::spawn(signal.cancelled());
        assert_pending!(waiter.poll());

        handle.cancel();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_dropped_handle_never_resolves() {
        let (handle, signal) = cancel_pair();
        let mut waiter = task::spawn(signal.cancelled());
        assert_pending!(waiter.poll());

        drop(handle);
        assert_pending!(waiter.poll());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_is_not_cancelled() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        assert!(signal.sleep(Duration::from_millis(10)).await.is_ok());
    }
}
