//! Fetch → process → commit loop over the fallback queue.
//!
//! Per message: `Fetched → Processing → {Committed | RetryScheduled →
//! Processing | DeadLettered}`, or `Released` when shutdown interrupts a retry
//! or the dead-letter publish fails. A message is committed only after a
//! terminal success or after it has been dead-lettered; a refused commit is
//! reported as `CommitFailed`, never as committed.

use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    dispatcher::Dispatcher,
    error::DeliveryError,
    metrics::DeliveryMetrics,
    models::{
        envelope::{DeadLetterMessage, QueuedEnvelope},
        retry::{RetryError, RetryPolicy},
    },
    queue::{DeadLetterSink, FetchedMessage, QueueReader},
    utils::{now_rfc3339, retry_with_policy, sleep_or_cancelled},
};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub name: String,
    pub retry_policy: RetryPolicy,
    pub fetch_error_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            name: "notification-worker-0".to_string(),
            retry_policy: RetryPolicy::default(),
            fetch_error_backoff: Duration::from_secs(1),
        }
    }
}

/// Terminal state of one fetched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Committed { attempts: u32 },
    DeadLettered { attempts: u32, error_kind: String },
    /// Handed back to the broker for redelivery.
    Released { attempts: u32 },
    /// Processing finished but the broker did not take the commit, so the
    /// message will be redelivered.
    CommitFailed { attempts: u32 },
}

impl Disposition {
    pub fn attempts(&self) -> u32 {
        match self {
            Disposition::Committed { attempts }
            | Disposition::DeadLettered { attempts, .. }
            | Disposition::Released { attempts }
            | Disposition::CommitFailed { attempts } => *attempts,
        }
    }
}

pub struct QueueConsumer<R: QueueReader> {
    reader: R,
    dispatcher: Arc<Dispatcher>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<DeliveryMetrics>,
    settings: ConsumerSettings,
}

impl<R: QueueReader> QueueConsumer<R> {
    pub fn new(
        reader: R,
        dispatcher: Arc<Dispatcher>,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: ConsumerSettings,
    ) -> Self {
        let metrics = Arc::clone(dispatcher.metrics());

        Self {
            reader,
            dispatcher,
            dead_letters,
            metrics,
            settings,
        }
    }

    /// Drains the queue until `shutdown` fires or the stream ends, then closes
    /// the reader exactly once.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), Error> {
        let span = info_span!("consumer", worker = %self.settings.name);

        async {
            info!(
                max_attempts = self.settings.retry_policy.max_attempts,
                base_delay_ms = self.settings.retry_policy.base_delay.as_millis() as u64,
                "Consumer started"
            );

            loop {
                let fetched = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("Shutdown requested, stopping fetch loop");
                        break;
                    }
                    fetched = self.reader.fetch() => fetched,
                };

                match fetched {
                    Ok(Some(message)) => {
                        self.handle(message, &shutdown).await;
                    }
                    Ok(None) => {
                        warn!("Queue stream ended");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to fetch message");
                        if !sleep_or_cancelled(self.settings.fetch_error_backoff, &shutdown).await {
                            break;
                        }
                    }
                }
            }

            let closed = self.reader.close().await;
            if let Err(e) = &closed {
                error!(error = %e, "Failed to close queue reader");
            }
            info!("Consumer stopped");
            closed
        }
        .instrument(span)
        .await
    }

    pub async fn handle(&mut self, message: FetchedMessage, shutdown: &CancellationToken) -> Disposition {
        let envelope = match QueuedEnvelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    delivery_tag = message.delivery_tag,
                    error = %e,
                    "Undecodable message, dead-lettering without retry"
                );
                return self.dead_letter(message, None, &e, 0, shutdown).await;
            }
        };

        let span = info_span!(
            "message",
            message_id = %envelope.message_id,
            delivery_tag = message.delivery_tag,
            redelivered = message.redelivered
        );

        self.process(message, envelope, shutdown).instrument(span).await
    }

    async fn process(
        &mut self,
        message: FetchedMessage,
        envelope: QueuedEnvelope,
        shutdown: &CancellationToken,
    ) -> Disposition {
        let dispatcher = self.dispatcher.as_ref();
        let metrics = self.metrics.as_ref();
        let queued = &envelope;

        let result = retry_with_policy(
            &self.settings.retry_policy,
            shutdown,
            DeliveryError::is_retryable,
            |attempt| async move {
                if attempt > 1 {
                    metrics.record_retry();
                }
                dispatcher.reprocess(queued).await
            },
        )
        .await;

        match result {
            Ok((_, attempts)) => self.commit(message, Disposition::Committed { attempts }).await,
            Err(RetryError::Cancelled { attempts, last_error }) => {
                info!(attempts, error = %last_error, "Shutdown during backoff, releasing message");
                self.release(message, attempts).await
            }
            Err(RetryError::Exhausted { attempts, last_error }) => {
                error!(
                    attempts,
                    error = %last_error,
                    "Max retries exceeded, moving message to dead letter queue"
                );
                self.dead_letter(message, Some(envelope), &last_error, attempts, shutdown)
                    .await
            }
            Err(RetryError::Fatal { attempts, error }) => {
                error!(
                    attempts,
                    error_kind = error.kind_label(),
                    error = %error,
                    "Unprocessable message, moving to dead letter queue"
                );
                self.dead_letter(message, Some(envelope), &error, attempts, shutdown)
                    .await
            }
        }
    }

    async fn dead_letter(
        &mut self,
        message: FetchedMessage,
        envelope: Option<QueuedEnvelope>,
        error: &DeliveryError,
        attempts: u32,
        shutdown: &CancellationToken,
    ) -> Disposition {
        let dead_letter = DeadLetterMessage {
            envelope,
            raw_payload: message.payload.clone(),
            failure_reason: error.to_string(),
            error_kind: error.kind_label().to_string(),
            attempts,
            failed_at: now_rfc3339(),
        };

        if let Err(e) = self.dead_letters.dead_letter(&dead_letter).await {
            error!(
                error = %e,
                backoff_ms = self.settings.fetch_error_backoff.as_millis() as u64,
                "Failed to publish to dead letter queue, releasing message after backoff"
            );
            // Released messages come straight back; pause so a dead DLQ does not spin the worker.
            sleep_or_cancelled(self.settings.fetch_error_backoff, shutdown).await;
            return self.release(message, attempts).await;
        }

        self.metrics.record_dead_lettered();
        self.commit(
            message,
            Disposition::DeadLettered {
                attempts,
                error_kind: dead_letter.error_kind,
            },
        )
        .await
    }

    async fn commit(&mut self, message: FetchedMessage, disposition: Disposition) -> Disposition {
        match self.reader.commit(&message).await {
            Ok(()) => {
                self.metrics.record_committed();
                info!(delivery_tag = message.delivery_tag, ?disposition, "Message committed");
                disposition
            }
            // The broker will redeliver; the envelope keeps its id so the caller can dedupe.
            Err(e) => {
                error!(
                    delivery_tag = message.delivery_tag,
                    ?disposition,
                    error = %e,
                    "Failed to commit message"
                );
                Disposition::CommitFailed {
                    attempts: disposition.attempts(),
                }
            }
        }
    }

    async fn release(&mut self, message: FetchedMessage, attempts: u32) -> Disposition {
        if let Err(e) = self.reader.release(&message).await {
            error!(delivery_tag = message.delivery_tag, error = %e, "Failed to release message");
        }
        self.metrics.record_released();
        Disposition::Released { attempts }
    }
}
