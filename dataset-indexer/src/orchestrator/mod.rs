//! Orchestrator module for the dataset indexer.
//!
//! Runs the single consumption loop: read one message, resolve it to a
//! disposition, settle it with the broker, then read the next one.

mod control;

pub use control::{ConsumerControl, PauseGuard};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout_at, Duration, Interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::consumer::{Disposition, EventHandler, InboundMessage};
use crate::errors::IngestError;
use control::ControlEndpoint;

/// Default time the in-flight message gets to finish after a shutdown
/// request.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A subscription to the catalog event queues.
#[async_trait]
pub trait EventSource: Send {
    /// Connect and subscribe. Replaces any previous subscription.
    async fn subscribe(&mut self) -> Result<(), IngestError>;

    /// Next delivery.
    ///
    /// `None` means the subscription was cancelled and has nothing left to
    /// deliver. An error means the subscription is lost.
    async fn next_message(&mut self) -> Option<Result<InboundMessage, IngestError>>;

    /// Acknowledge or reject a delivery.
    async fn settle(
        &mut self,
        delivery_tag: u64,
        disposition: Disposition,
    ) -> Result<(), IngestError>;

    /// Stop receiving new deliveries. Deliveries already received can still
    /// be settled.
    async fn cancel(&mut self) -> Result<(), IngestError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long the in-flight message may run after shutdown is requested.
    pub grace_period: Duration,
    /// How often progress is logged.
    pub progress_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Message counts since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dropped: u64,
    /// Messages left unsettled at the shutdown grace boundary.
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn record(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Ack => &self.acked,
            Disposition::NackRequeue => &self.requeued,
            Disposition::NackDrop => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Periodic progress logging with a rate since the previous report.
struct Progress {
    timer: Interval,
    prev_received: u64,
    prev_time: Instant,
}

impl Progress {
    fn new(period: Duration) -> Self {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            timer,
            prev_received: 0,
            prev_time: Instant::now(),
        }
    }

    fn report(&mut self, counters: &Counters) {
        let stats = counters.snapshot();
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.prev_time).as_secs_f64();

        let messages_per_sec = if elapsed_secs > 0.0 {
            (stats.received.saturating_sub(self.prev_received) as f64) / elapsed_secs
        } else {
            0.0
        };

        info!(
            received = stats.received,
            acked = stats.acked,
            requeued = stats.requeued,
            dropped = stats.dropped,
            messages_per_sec = format!("{:.2}", messages_per_sec),
            "Processing progress"
        );

        self.prev_received = stats.received;
        self.prev_time = now;
    }
}

/// How one subscription ended.
enum Exit {
    Shutdown,
    Paused,
    Finished,
    Lost(IngestError),
}

/// What woke the loop up.
enum Step {
    Shutdown,
    Pause,
    Tick,
    Message(Option<Result<InboundMessage, IngestError>>),
}

/// Coordinates the event source and the message handler.
///
/// The orchestrator:
/// - Subscribes, and re-subscribes after a lost connection
/// - Resolves one message at a time and settles it before reading the next
/// - Cancels the subscription while a [`ConsumerControl`] pause is held
/// - Drains the in-flight message on shutdown
pub struct Orchestrator {
    source: Box<dyn EventSource>,
    handler: Arc<EventHandler>,
    config: OrchestratorConfig,
    control: ConsumerControl,
    endpoint: ControlEndpoint,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    counters: Arc<Counters>,
}

impl Orchestrator {
    /// Create a new orchestrator with the default configuration.
    pub fn new(source: Box<dyn EventSource>, handler: EventHandler) -> Self {
        Self::with_config(source, handler, OrchestratorConfig::default())
    }

    /// Create a new orchestrator with custom configuration.
    pub fn with_config(
        source: Box<dyn EventSource>,
        handler: EventHandler,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (control, endpoint) = ConsumerControl::channel();

        Self {
            source,
            handler: Arc::new(handler),
            config,
            control,
            endpoint,
            shutdown_tx,
            shutdown_rx,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Handle for pausing the loop from elsewhere in the process.
    pub fn control(&self) -> ConsumerControl {
        self.control.clone()
    }

    /// Sender that triggers a graceful shutdown when sent to.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Trigger a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.counters.snapshot()
    }

    /// Run the consumption loop until shutdown.
    ///
    /// Returns an error only when the broker cannot be reached within the
    /// source's retry budget.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<(), IngestError> {
        info!("Starting event consumer");
        let mut progress = Progress::new(self.config.progress_interval);

        let result = loop {
            if self.endpoint.is_paused() {
                info!("Consumer paused");
                tokio::select! {
                    _ = self.endpoint.resume_requested() => info!("Consumer resumed"),
                    _ = self.shutdown_rx.recv() => break Ok(()),
                }
            }

            tokio::select! {
                subscribed = self.source.subscribe() => {
                    if let Err(e) = subscribed {
                        error!(error = %e, "Unable to subscribe to the event queues");
                        break Err(e);
                    }
                }
                _ = self.shutdown_rx.recv() => break Ok(()),
            }

            info!("Ready to process catalog events");
            self.endpoint.set_running(true);
            let exit = self.consume(&mut progress).await;
            self.endpoint.set_running(false);

            match exit {
                Exit::Shutdown => break Ok(()),
                Exit::Finished => {
                    info!("Subscription ended");
                    break Ok(());
                }
                Exit::Paused => continue,
                Exit::Lost(e) => {
                    warn!(error = %e, "Lost broker subscription, reconnecting");
                    continue;
                }
            }
        };

        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close event source");
        }

        let stats = self.stats();
        info!(
            received = stats.received,
            acked = stats.acked,
            requeued = stats.requeued,
            dropped = stats.dropped,
            abandoned = stats.abandoned,
            "Consumer shutdown complete"
        );
        result
    }

    /// Consume from the current subscription until something ends it.
    async fn consume(&mut self, progress: &mut Progress) -> Exit {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => Step::Shutdown,
                _ = self.endpoint.pause_requested() => Step::Pause,
                _ = progress.timer.tick() => Step::Tick,
                message = self.source.next_message() => Step::Message(message),
            };

            match step {
                Step::Shutdown => {
                    info!("Received shutdown signal");
                    self.cancel_subscription().await;
                    return Exit::Shutdown;
                }
                Step::Pause => {
                    info!("Pausing consumer");
                    self.cancel_subscription().await;
                    return Exit::Paused;
                }
                Step::Tick => progress.report(&self.counters),
                Step::Message(None) => return Exit::Finished,
                Step::Message(Some(Err(e))) => return Exit::Lost(e),
                Step::Message(Some(Ok(message))) => {
                    if let Some(exit) = self.process(message).await {
                        return exit;
                    }
                }
            }
        }
    }

    /// Resolve and settle one message.
    ///
    /// A shutdown request while the handler runs starts the grace period;
    /// the message is settled if both the handler and the settle finish in
    /// time and left unsettled otherwise.
    async fn process(&mut self, message: InboundMessage) -> Option<Exit> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let delivery_tag = message.delivery_tag;

        let handler = Arc::clone(&self.handler);
        let in_flight = async move { handler.handle(&message).await };
        tokio::pin!(in_flight);

        let mut deadline = None;
        let disposition = tokio::select! {
            disposition = &mut in_flight => Some(disposition),
            _ = self.shutdown_rx.recv() => {
                let grace_ends = tokio::time::Instant::now() + self.config.grace_period;
                deadline = Some(grace_ends);
                info!(
                    delivery_tag,
                    grace_period_secs = self.config.grace_period.as_secs(),
                    "Received shutdown signal, waiting for in-flight message"
                );
                if timeout_at(grace_ends, self.cancel_subscription()).await.is_err() {
                    warn!("Cancelling the subscription did not finish within the grace period");
                }

                match timeout_at(grace_ends, &mut in_flight).await {
                    Ok(disposition) => Some(disposition),
                    Err(_) => {
                        warn!(
                            delivery_tag,
                            "In-flight message not resolved within the grace period, abandoning it"
                        );
                        None
                    }
                }
            }
        };

        let Some(disposition) = disposition else {
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            return Some(Exit::Shutdown);
        };

        let settled = match deadline {
            Some(grace_ends) => timeout_at(grace_ends, self.source.settle(delivery_tag, disposition))
                .await
                .ok(),
            None => Some(self.source.settle(delivery_tag, disposition).await),
        };

        match settled {
            Some(Ok(())) => self.counters.record(disposition),
            Some(Err(e)) => {
                self.counters.record(disposition);
                error!(delivery_tag, disposition = %disposition, error = %e, "Failed to settle message");
                if deadline.is_none() {
                    return Some(Exit::Lost(e));
                }
            }
            None => {
                warn!(
                    delivery_tag,
                    disposition = %disposition,
                    "Settling the in-flight message did not finish within the grace period, abandoning it"
                );
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }

        deadline.map(|_| Exit::Shutdown)
    }

    async fn cancel_subscription(&mut self) {
        if let Err(e) = self.source.cancel().await {
            warn!(error = %e, "Failed to cancel subscription");
        }
    }
}
