//! Error taxonomy for the delivery pipeline.
//!
//! The consumer decides between retrying and dead-lettering purely through
//! [`DeliveryError::is_retryable`]; the front door maps each variant onto a
//! caller-facing status.

use std::time::Duration;

use thiserror::Error;

use crate::models::notification::NotificationKind;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Bad input. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The transport refused or failed the send.
    #[error("{kind} delivery failed: {source}")]
    ChannelDelivery {
        kind: NotificationKind,
        #[source]
        source: ChannelError,
    },

    /// Direct send failed and the fallback publish failed too.
    #[error("Both direct send and fallback enqueue failed: {0}")]
    Enqueue(#[source] anyhow::Error),

    #[error("Unsupported notification type: {0}")]
    UnsupportedKind(String),

    /// Structurally unprocessable envelope or payload.
    #[error("Malformed envelope: {0}")]
    Decode(String),
}

impl DeliveryError {
    pub fn channel(kind: NotificationKind, source: ChannelError) -> Self {
        DeliveryError::ChannelDelivery { kind, source }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::ChannelDelivery { .. })
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            DeliveryError::Validation(_) => "validation",
            DeliveryError::ChannelDelivery { .. } => "channel_delivery",
            DeliveryError::Enqueue(_) => "enqueue",
            DeliveryError::UnsupportedKind(_) => "unsupported_kind",
            DeliveryError::Decode(_) => "decode",
        }
    }
}

/// Failures raised by a concrete transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered but refused the message.
    #[error("Rejected by provider: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("Render failed: {0}")]
    Render(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ChannelError::Transport(format!("request timed out: {}", error))
        } else {
            ChannelError::Transport(error.to_string())
        }
    }
}

/// Permanent (5xx) SMTP replies are rejections; transient replies and
/// connection failures are transport errors.
impl From<lettre::transport::smtp::Error> for ChannelError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        if error.is_permanent() {
            ChannelError::Rejected(error.to_string())
        } else {
            ChannelError::Transport(error.to_string())
        }
    }
}
