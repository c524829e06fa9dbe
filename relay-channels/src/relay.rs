//! Relay service: per-channel workers that turn inbound events into replies.
//!
//! ```text
//! listen ─▶ dispatch ─▶ [queue: channel A] ─▶ worker A ─▶ router ─▶ chunker ─▶ send
//!                   └─▶ [queue: channel B] ─▶ worker B ─▶ ...
//! ```
//!
//! Each channel has at most one worker, so a channel's turns (post, run and
//! the sends of its reply) happen strictly in arrival order while other
//! channels proceed in parallel. Idle workers exit; a new one is spawned on
//! the next event.

use crate::chunker::ResponseChunker;
use crate::message::InboundEvent;
use crate::router::SessionRouter;
use crate::traits::Channel;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Default time a worker waits for its next event before exiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

type WorkerMap = DashMap<String, mpsc::UnboundedSender<InboundEvent>>;

/// Processes one event end to end.
struct Handler {
    router: Arc<SessionRouter>,
    channel: Arc<dyn Channel>,
    chunker: ResponseChunker,
}

impl Handler {
    async fn process(&self, event: InboundEvent) {
        let span = relay_common::channel_span!(
            event.channel_type.as_str(),
            event.trace_id,
            event.channel_id,
            author = %event.author_name
        );

        async {
            let started = std::time::Instant::now();

            match self
                .router
                .handle(&event.channel_id, &event.author_name, &event.text)
                .await
            {
                Ok(reply) => {
                    let chunks = self.chunker.chunk(&reply);
                    if chunks.is_empty() {
                        tracing::warn!("Assistant returned an empty reply, nothing to send");
                    }
                    let total = chunks.len();
                    for (index, chunk) in chunks.iter().enumerate() {
                        if let Err(e) = self.channel.send_text(&event.channel_id, chunk).await {
                            tracing::error!(
                                error = %e,
                                chunk = index + 1,
                                total,
                                "Failed to send reply chunk, dropping the rest"
                            );
                            break;
                        }
                    }
                    tracing::info!(
                        chunks = total,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Reply delivered"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to produce reply");
                    if let Err(send_err) = self
                        .channel
                        .send_text(&event.channel_id, e.user_notice())
                        .await
                    {
                        tracing::error!(error = %send_err, "Failed to send failure notice");
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }
}

/// Dispatches inbound events to per-channel workers.
pub struct RelayService {
    handler: Arc<Handler>,
    workers: Arc<WorkerMap>,
    idle_timeout: Duration,
    done_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

impl RelayService {
    pub fn new(router: Arc<SessionRouter>, channel: Arc<dyn Channel>, chunker: ResponseChunker) -> Self {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            handler: Arc::new(Handler {
                router,
                channel,
                chunker,
            }),
            workers: Arc::new(DashMap::new()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            done_tx,
            done_rx,
        }
    }

    /// Set how long an idle worker lingers.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Queue an event on its channel's worker, spawning one if needed.
    ///
    /// Never blocks; must be called from within a tokio runtime.
    pub fn dispatch(&self, event: InboundEvent) {
        let channel_id = event.channel_id.clone();
        let tx = self
            .workers
            .entry(channel_id.clone())
            .or_insert_with(|| self.spawn_worker(channel_id.clone()))
            .value()
            .clone();

        if let Err(mpsc::error::SendError(event)) = tx.send(event) {
            // The worker only exits once its entry is gone, so this is unexpected
            tracing::error!(
                channel_id = %channel_id,
                trace_id = %event.trace_id,
                "Channel worker unavailable, dropping message"
            );
        }
    }

    /// Number of live channel workers.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting events and wait for queued ones to finish.
    pub async fn shutdown(self) {
        let Self {
            workers,
            done_tx,
            mut done_rx,
            ..
        } = self;

        tracing::info!(workers = workers.len(), "Draining channel workers");
        workers.clear();
        drop(done_tx);

        // Resolves once every worker has dropped its completion handle
        let _ = done_rx.recv().await;
        tracing::info!("All channel workers finished");
    }

    fn spawn_worker(&self, channel_id: String) -> mpsc::UnboundedSender<InboundEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
        let handler = self.handler.clone();
        let workers = self.workers.clone();
        let idle_timeout = self.idle_timeout;
        let done = self.done_tx.clone();

        tracing::debug!(channel_id = %channel_id, "Spawning channel worker");

        tokio::spawn(async move {
            let _done = done;

            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(event)) => handler.process(event).await,
                    // All senders dropped and the queue is drained
                    Ok(None) => break,
                    Err(_) => {
                        // Retire only if nothing is queued and no dispatcher
                        // holds a sender clone
                        let retired = workers
                            .remove_if(&channel_id, |_, tx| tx.strong_count() == 1 && rx.is_empty())
                            .is_some();
                        if retired {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(channel_id = %channel_id, "Channel worker exited");
        });

        tx
    }
}
