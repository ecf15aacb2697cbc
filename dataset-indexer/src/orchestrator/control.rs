//! In-process pause and resume of the consumption loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Handle used to pause the consumer while another writer owns the index.
///
/// Cheap to clone. Pauses nest: the loop resumes once every guard is dropped.
#[derive(Debug, Clone)]
pub struct ConsumerControl {
    /// Number of outstanding pause requests.
    pauses: Arc<watch::Sender<u32>>,
    /// Whether the loop currently holds a subscription.
    running: watch::Receiver<bool>,
}

/// Loop side of a [`ConsumerControl`].
#[derive(Debug)]
pub(crate) struct ControlEndpoint {
    pub(crate) pauses: watch::Receiver<u32>,
    running: watch::Sender<bool>,
}

/// Keeps the consumer paused until dropped.
#[derive(Debug)]
#[must_use = "the consumer resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    pauses: Arc<watch::Sender<u32>>,
}

impl ConsumerControl {
    pub(crate) fn channel() -> (Self, ControlEndpoint) {
        let (pauses_tx, pauses_rx) = watch::channel(0);
        let (running_tx, running_rx) = watch::channel(false);

        (
            Self {
                pauses: Arc::new(pauses_tx),
                running: running_rx,
            },
            ControlEndpoint {
                pauses: pauses_rx,
                running: running_tx,
            },
        )
    }

    /// Ask the loop to cancel its subscription and wait until it is idle.
    ///
    /// Returns immediately when the loop is not running.
    pub async fn pause(&self) -> PauseGuard {
        self.pauses.send_modify(|n| *n += 1);
        debug!("Consumer pause requested");

        let mut running = self.running.clone();
        // An error means the loop is gone, which is as idle as it gets.
        let _ = running.wait_for(|running| !running).await;

        PauseGuard {
            pauses: Arc::clone(&self.pauses),
        }
    }

    /// Whether the loop currently consumes messages.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.pauses.send_modify(|n| *n = n.saturating_sub(1));
        debug!("Consumer pause released");
    }
}

impl ControlEndpoint {
    pub(crate) fn set_running(&self, running: bool) {
        self.running.send_replace(running);
    }

    /// Completes once at least one pause is outstanding.
    pub(crate) async fn pause_requested(&mut self) {
        Self::wait_until(&mut self.pauses, |n| n > 0).await
    }

    /// Completes once no pause is outstanding.
    pub(crate) async fn resume_requested(&mut self) {
        Self::wait_until(&mut self.pauses, |n| n == 0).await
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.pauses.borrow() > 0
    }

    async fn wait_until(pauses: &mut watch::Receiver<u32>, condition: impl Fn(u32) -> bool) {
        loop {
            if condition(*pauses.borrow_and_update()) {
                return;
            }
            if pauses.changed().await.is_err() {
                // Every control handle is gone; the state can no longer change.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pause_when_idle_returns_immediately() {
        let (control, endpoint) = ConsumerControl::channel();
        assert!(!control.is_running());

        let guard = control.pause().await;
        assert!(endpoint.is_paused());
        drop(guard);
        assert!(!endpoint.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_waits_for_loop_to_stop() {
        let (control, mut endpoint) = ConsumerControl::channel();
        endpoint.set_running(true);
        assert!(control.is_running());

        let pausing = tokio::spawn({
            let control = control.clone();
            async move { control.pause().await }
        });

        endpoint.pause_requested().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!pausing.is_finished());

        endpoint.set_running(false);
        let guard = pausing.await.unwrap();
        assert!(!control.is_running());

        drop(guard);
        endpoint.resume_requested().await;
    }

    #[tokio::test]
    async fn test_pauses_nest() {
        let (control, endpoint) = ConsumerControl::channel();
        let first = control.pause().await;
        let second = control.pause().await;

        drop(first);
        assert!(endpoint.is_paused());
        drop(second);
        assert!(!endpoint.is_paused());
    }
}
