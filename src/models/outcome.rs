use serde::{Deserialize, Serialize};

use crate::models::notification::NotificationId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub used_fallback: bool,
    pub notification_id: NotificationId,
    pub message: String,
}

impl DeliveryOutcome {
    pub fn delivered(notification_id: NotificationId, message: impl Into<String>) -> Self {
        Self {
            success: true,
            used_fallback: false,
            notification_id,
            message: message.into(),
        }
    }

    pub fn queued(notification_id: NotificationId, message: impl Into<String>) -> Self {
        Self {
            success: true,
            used_fallback: true,
            notification_id,
            message: message.into(),
        }
    }
}
