//! Dual-path delivery: one direct attempt, then an optional durable fallback.
//!
//! `send` never retries. A failed direct attempt either surfaces the channel
//! error or hands the request to the queue; all retrying happens later in the
//! consumer, which calls `reprocess`.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    clients::{channel::ChannelRegistry, template::TemplateCatalog},
    error::{ChannelError, DeliveryError},
    metrics::DeliveryMetrics,
    models::{
        envelope::QueuedEnvelope,
        notification::{NotificationId, NotificationKind, NotificationRequest},
        outcome::DeliveryOutcome,
        validation::validate_request,
    },
    queue::QueueProducer,
};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Dispatcher {
    channels: ChannelRegistry,
    producer: Arc<dyn QueueProducer>,
    templates: TemplateCatalog,
    metrics: Arc<DeliveryMetrics>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        channels: ChannelRegistry,
        producer: Arc<dyn QueueProducer>,
        templates: TemplateCatalog,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        Self {
            channels,
            producer,
            templates,
            metrics,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub async fn send(&self, request: NotificationRequest) -> Result<DeliveryOutcome, DeliveryError> {
        validate_request(&request, &self.templates)?;

        let notification_id = NotificationId::generate();
        let kind = request.kind;

        info!(
            notification_id = %notification_id,
            kind = %kind,
            template_code = request.template_code().unwrap_or("raw"),
            allow_fallback = request.allow_fallback,
            "Accepted notification"
        );

        let error = match self.attempt(kind, &notification_id, &request).await {
            Ok(()) => {
                self.metrics.record_direct_sent();
                info!(notification_id = %notification_id, kind = %kind, "Direct delivery succeeded");
                return Ok(DeliveryOutcome::delivered(
                    notification_id,
                    format!("{} sent successfully", capitalize(kind.as_str())),
                ));
            }
            Err(DeliveryError::ChannelDelivery { source, .. }) => source,
            Err(other) => return Err(other),
        };

        self.metrics.record_direct_failed();

        if !request.allow_fallback {
            warn!(
                notification_id = %notification_id,
                kind = %kind,
                error = %error,
                "Direct delivery failed and fallback is not allowed"
            );
            return Err(DeliveryError::channel(kind, error));
        }

        warn!(
            notification_id = %notification_id,
            kind = %kind,
            error = %error,
            "Direct delivery failed, falling back to queue"
        );

        let envelope = QueuedEnvelope::for_request(notification_id.clone(), &request)?;

        if let Err(e) = self.producer.enqueue(&envelope).await {
            self.metrics.record_enqueue_failed();
            warn!(notification_id = %notification_id, error = %e, "Fallback enqueue failed");
            return Err(DeliveryError::Enqueue(e.context(format!(
                "direct send failed first: {}",
                error
            ))));
        }

        self.metrics.record_fallback_enqueued();
        info!(notification_id = %notification_id, "Notification queued for later processing");

        Ok(DeliveryOutcome::queued(
            notification_id,
            format!("{} queued for later processing", capitalize(kind.as_str())),
        ))
    }

    /// Delivers a queued envelope. Never re-enqueues: a failure goes back to
    /// the caller, which owns the retry decision.
    pub async fn reprocess(&self, envelope: &QueuedEnvelope) -> Result<DeliveryOutcome, DeliveryError> {
        let result = self.reprocess_inner(envelope).await;

        match &result {
            Ok(_) => self.metrics.record_reprocessed(),
            Err(_) => self.metrics.record_reprocess_failed(),
        }

        result
    }

    async fn reprocess_inner(
        &self,
        envelope: &QueuedEnvelope,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let kind = envelope.kind()?;
        let request = envelope.request()?;

        if request.kind != kind {
            return Err(DeliveryError::Decode(format!(
                "Envelope type '{}' does not match payload kind '{}'",
                envelope.notification_type, request.kind
            )));
        }

        validate_request(&request, &self.templates)?;

        debug!(
            notification_id = %envelope.message_id,
            kind = %kind,
            created_at = %envelope.created_at,
            "Reprocessing queued notification"
        );

        self.attempt(kind, &envelope.message_id, &request).await?;

        info!(notification_id = %envelope.message_id, kind = %kind, "Queued notification delivered");

        Ok(DeliveryOutcome::queued(
            envelope.message_id.clone(),
            format!("Queued {} delivered", kind.as_str()),
        ))
    }

    async fn attempt(
        &self,
        kind: NotificationKind,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<(), DeliveryError> {
        let channel = self.channels.get(kind)?;

        match tokio::time::timeout(self.send_timeout, channel.send(notification_id, request)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ChannelError::Render(reason))) => Err(DeliveryError::Validation(reason)),
            Ok(Err(e)) => Err(DeliveryError::channel(kind, e)),
            Err(_) => Err(DeliveryError::channel(
                kind,
                ChannelError::Timeout(self.send_timeout),
            )),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
