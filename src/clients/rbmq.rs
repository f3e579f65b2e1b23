use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    models::envelope::{DeadLetterMessage, QueuedEnvelope},
    queue::{DeadLetterSink, FetchedMessage, QueueProducer, QueueReader},
};

const PERSISTENT: u8 = 2;

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    notification_queue_name: String,
    dead_letter_queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|_| anyhow!("Failed to connect to RabbitMQ"))?;

        debug!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to enable publisher confirms"))?;

        for queue_name in [&config.notification_queue_name, &config.dead_letter_queue_name] {
            channel
                .queue_declare(
                    queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|_| anyhow!("Failed to declare queue {}", queue_name))?;
        }

        info!(
            queue = %config.notification_queue_name,
            dead_letter_queue = %config.dead_letter_queue_name,
            "RabbitMQ queues declared"
        );

        Ok(Self {
            connection,
            channel,
            notification_queue_name: config.notification_queue_name.clone(),
            dead_letter_queue_name: config.dead_letter_queue_name.clone(),
        })
    }

    pub async fn into_reader(self, consumer_tag: &str) -> Result<RabbitMqReader, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.notification_queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to create consumer"))?;

        info!(consumer_tag, queue = %self.notification_queue_name, "Consumer created for queue");

        Ok(RabbitMqReader {
            connection: self.connection,
            channel: self.channel,
            consumer,
            consumer_tag: consumer_tag.to_string(),
            closed: false,
        })
    }

    async fn publish(&self, queue_name: &str, payload: &[u8]) -> Result<(), Error> {
        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish to {}: {}", queue_name, e))?
            .await
            .map_err(|e| anyhow!("Publish to {} was not confirmed: {}", queue_name, e))?;

        if confirmation.is_nack() {
            return Err(anyhow!("Broker rejected publish to {}", queue_name));
        }

        Ok(())
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.connection
            .close(200, "Publisher shutting down")
            .await
            .map_err(|e| anyhow!("Failed to close RabbitMQ connection: {}", e))
    }
}

#[async_trait]
impl QueueProducer for RabbitMqClient {
    async fn enqueue(&self, envelope: &QueuedEnvelope) -> Result<(), Error> {
        let payload = envelope.encode()?;
        self.publish(&self.notification_queue_name, &payload).await?;

        debug!(message_id = %envelope.message_id, "Envelope published");
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for RabbitMqClient {
    async fn dead_letter(&self, message: &DeadLetterMessage) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;
        self.publish(&self.dead_letter_queue_name, &payload).await
    }
}

/// One consumer on its own connection; acknowledgement is manual.
pub struct RabbitMqReader {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
    closed: bool,
}

#[async_trait]
impl QueueReader for RabbitMqReader {
    async fn fetch(&mut self) -> Result<Option<FetchedMessage>, Error> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(FetchedMessage {
                delivery_tag: delivery.delivery_tag,
                payload: delivery.data,
                redelivered: delivery.redelivered,
            })),
            Some(Err(e)) => Err(anyhow!("Failed to receive delivery: {}", e)),
            None => Ok(None),
        }
    }

    async fn commit(&mut self, message: &FetchedMessage) -> Result<(), Error> {
        self.channel
            .basic_ack(message.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    async fn release(&mut self, message: &FetchedMessage) -> Result<(), Error> {
        self.channel
            .basic_reject(message.delivery_tag, BasicRejectOptions { requeue: true })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(consumer_tag = %self.consumer_tag, error = %e, "Failed to cancel consumer");
        }

        // Closing the connection hands any unacknowledged delivery back to the queue.
        self.connection
            .close(200, "Consumer shutting down")
            .await
            .map_err(|e| anyhow!("Failed to close RabbitMQ connection: {}", e))?;

        info!(consumer_tag = %self.consumer_tag, "Consumer closed");
        Ok(())
    }
}
