use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::DeliveryError,
    models::notification::{NotificationId, NotificationKind, NotificationRequest},
};

/// Durable, queued form of a request awaiting asynchronous (re)delivery.
///
/// `notification_type` stays a plain string so that envelopes written by newer
/// producers still decode; an unknown type is rejected later by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEnvelope {
    pub message_id: NotificationId,
    pub notification_type: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl QueuedEnvelope {
    pub fn for_request(
        message_id: NotificationId,
        request: &NotificationRequest,
    ) -> Result<Self, DeliveryError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| DeliveryError::Decode(format!("Failed to serialize request: {}", e)))?;

        Ok(Self {
            message_id,
            notification_type: request.kind.as_str().to_string(),
            payload,
            created_at: Utc::now(),
        })
    }

    pub fn kind(&self) -> Result<NotificationKind, DeliveryError> {
        self.notification_type.parse()
    }

    pub fn request(&self) -> Result<NotificationRequest, DeliveryError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| DeliveryError::Decode(format!("Invalid notification payload: {}", e)))
    }

    pub fn encode(&self) -> Result<Vec<u8>, DeliveryError> {
        serde_json::to_vec(self)
            .map_err(|e| DeliveryError::Decode(format!("Failed to serialize envelope: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DeliveryError> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| DeliveryError::Decode(format!("Invalid envelope: {}", e)))?;

        if envelope.message_id.as_str().is_empty() {
            return Err(DeliveryError::Decode("Envelope has an empty message_id".to_string()));
        }

        Ok(envelope)
    }
}

/// Terminal record for a message that will never be delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    /// `None` when the original bytes could not be decoded at all.
    pub envelope: Option<QueuedEnvelope>,
    #[serde(with = "base64_bytes")]
    pub raw_payload: Vec<u8>,
    pub failure_reason: String,
    pub error_kind: String,
    pub attempts: u32,
    pub failed_at: String,
}

impl DeadLetterMessage {
    pub fn message_id(&self) -> Option<&NotificationId> {
        self.envelope.as_ref().map(|envelope| &envelope.message_id)
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
