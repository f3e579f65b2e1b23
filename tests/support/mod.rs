#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use notification_service::{
    clients::{
        channel::{ChannelRegistry, NotificationChannel},
        template::TemplateCatalog,
    },
    consumer::{ConsumerSettings, QueueConsumer},
    dispatcher::Dispatcher,
    error::ChannelError,
    metrics::DeliveryMetrics,
    models::{
        envelope::{DeadLetterMessage, QueuedEnvelope},
        notification::{NotificationId, NotificationKind, NotificationRequest},
        retry::RetryPolicy,
    },
    queue::{DeadLetterSink, FetchedMessage, QueueProducer, QueueReader},
};
use serde_json::json;
use tokio::sync::Mutex;

pub fn register_request(recipient: &str) -> NotificationRequest {
    let data = HashMap::from([
        ("name".to_string(), json!("Ada")),
        ("otp".to_string(), json!("482913")),
    ]);
    NotificationRequest::email_template(recipient, "REGISTER", data)
}

/// Channel whose outcome is scripted per call.
pub struct ScriptedChannel {
    failures_left: AtomicU32,
    delay: Option<Duration>,
    calls: Arc<AtomicU32>,
    seen_ids: Mutex<Vec<NotificationId>>,
}

impl ScriptedChannel {
    pub fn healthy() -> Arc<Self> {
        Self::failing_times(0)
    }

    pub fn failing() -> Arc<Self> {
        Self::failing_times(u32::MAX)
    }

    /// Fails the first `failures` calls, then succeeds.
    pub fn failing_times(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            delay: None,
            calls: Arc::new(AtomicU32::new(0)),
            seen_ids: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(0),
            delay: Some(delay),
            calls: Arc::new(AtomicU32::new(0)),
            seen_ids: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn seen_ids(&self) -> Vec<NotificationId> {
        self.seen_ids.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        notification_id: &NotificationId,
        _request: &NotificationRequest,
    ) -> Result<(), ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_ids.lock().await.push(notification_id.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();

        if failed {
            Err(ChannelError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct RecordingProducer {
    fail: AtomicBool,
    enqueued: Mutex<Vec<QueuedEnvelope>>,
}

impl RecordingProducer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broken() -> Arc<Self> {
        let producer = Self::default();
        producer.fail.store(true, Ordering::SeqCst);
        Arc::new(producer)
    }

    pub async fn enqueued(&self) -> Vec<QueuedEnvelope> {
        self.enqueued.lock().await.clone()
    }

    /// Everything published so far, as the broker would hand it to a reader.
    pub async fn drain(&self) -> Vec<Vec<u8>> {
        self.enqueued
            .lock()
            .await
            .drain(..)
            .map(|envelope| envelope.encode().expect("envelope encodes"))
            .collect()
    }
}

#[async_trait]
impl QueueProducer for RecordingProducer {
    async fn enqueue(&self, envelope: &QueuedEnvelope) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("broker unavailable"));
        }
        self.enqueued.lock().await.push(envelope.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDeadLetters {
    fail: AtomicBool,
    messages: Mutex<Vec<DeadLetterMessage>>,
}

impl RecordingDeadLetters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broken() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    pub async fn messages(&self) -> Vec<DeadLetterMessage> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn dead_letter(&self, message: &DeadLetterMessage) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("dead letter queue unavailable"));
        }
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}

/// What a [`MemoryReader`] did with its messages.
#[derive(Default)]
pub struct ReaderLog {
    pub committed: Mutex<Vec<u64>>,
    pub released: Mutex<Vec<u64>>,
    pub closes: AtomicU32,
}

impl ReaderLog {
    pub async fn committed(&self) -> Vec<u64> {
        self.committed.lock().await.clone()
    }

    pub async fn released(&self) -> Vec<u64> {
        self.released.lock().await.clone()
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

/// In-memory reader. Once drained it either reports end of stream or blocks
/// like an idle broker would.
pub struct MemoryReader {
    pending: VecDeque<FetchedMessage>,
    block_when_empty: bool,
    refuse_commits: bool,
    log: Arc<ReaderLog>,
}

impl MemoryReader {
    pub fn new(payloads: Vec<Vec<u8>>) -> (Self, Arc<ReaderLog>) {
        let pending = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| FetchedMessage {
                delivery_tag: index as u64 + 1,
                payload,
                redelivered: false,
            })
            .collect();
        let log = Arc::new(ReaderLog::default());

        (
            Self {
                pending,
                block_when_empty: false,
                refuse_commits: false,
                log: Arc::clone(&log),
            },
            log,
        )
    }

    pub fn blocking(mut self) -> Self {
        self.block_when_empty = true;
        self
    }

    /// Every commit fails, as on a dropped broker channel.
    pub fn refusing_commits(mut self) -> Self {
        self.refuse_commits = true;
        self
    }
}

#[async_trait]
impl QueueReader for MemoryReader {
    async fn fetch(&mut self) -> Result<Option<FetchedMessage>> {
        match self.pending.pop_front() {
            Some(message) => Ok(Some(message)),
            None if self.block_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn commit(&mut self, message: &FetchedMessage) -> Result<()> {
        if self.refuse_commits {
            return Err(anyhow!("channel closed"));
        }
        self.log.committed.lock().await.push(message.delivery_tag);
        Ok(())
    }

    async fn release(&mut self, message: &FetchedMessage) -> Result<()> {
        self.log.released.lock().await.push(message.delivery_tag);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn dispatcher(
    channel: Arc<ScriptedChannel>,
    producer: Arc<RecordingProducer>,
) -> Arc<Dispatcher> {
    let channels = ChannelRegistry::new().with_channel(NotificationKind::Email, channel);
    Arc::new(Dispatcher::new(
        channels,
        producer,
        TemplateCatalog::default(),
        Arc::new(DeliveryMetrics::default()),
    ))
}

pub fn consumer(
    reader: MemoryReader,
    dispatcher: Arc<Dispatcher>,
    dead_letters: Arc<RecordingDeadLetters>,
) -> QueueConsumer<MemoryReader> {
    let settings = ConsumerSettings {
        name: "test-worker".to_string(),
        retry_policy: RetryPolicy::default(),
        fetch_error_backoff: Duration::from_millis(10),
    };
    QueueConsumer::new(reader, dispatcher, dead_letters, settings)
}
