//! Broker seams used by the dispatcher and the consumer.
//!
//! A fetched message stays owned by the broker until it is either committed
//! (acknowledged, never delivered again) or released (returned for
//! redelivery). Closing a reader releases anything still in flight.

use anyhow::{Error, Result};
use async_trait::async_trait;

use crate::models::envelope::{DeadLetterMessage, QueuedEnvelope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

#[async_trait]
pub trait QueueProducer: Send + Sync {
    async fn enqueue(&self, envelope: &QueuedEnvelope) -> Result<(), Error>;
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, message: &DeadLetterMessage) -> Result<(), Error>;
}

#[async_trait]
pub trait QueueReader: Send {
    /// Next message, or `None` once the underlying stream has ended.
    async fn fetch(&mut self) -> Result<Option<FetchedMessage>, Error>;

    async fn commit(&mut self, message: &FetchedMessage) -> Result<(), Error>;

    async fn release(&mut self, message: &FetchedMessage) -> Result<(), Error>;

    async fn close(&mut self) -> Result<(), Error>;
}
