use serde::{Deserialize, Serialize};

use crate::models::{notification::NotificationId, outcome::DeliveryOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
        }
    }

    pub fn error(error: String, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub notification_id: NotificationId,
    pub used_fallback: bool,
}

impl From<DeliveryOutcome> for ApiResponse<SendResponse> {
    fn from(outcome: DeliveryOutcome) -> Self {
        let data = SendResponse {
            notification_id: outcome.notification_id,
            used_fallback: outcome.used_fallback,
        };

        Self {
            success: outcome.success,
            data: Some(data),
            error: None,
            message: outcome.message,
        }
    }
}
