use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    clients::{channel::NotificationChannel, template::TemplateCatalog},
    config::Config,
    error::ChannelError,
    models::{
        fcm::{FcmMessage, FcmNotification, FcmRequest},
        notification::{NotificationContent, NotificationId, NotificationRequest},
    },
};

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Push delivery over the FCM HTTP v1 API.
pub struct FcmChannel {
    http_client: Client,
    base_url: String,
    fcm_project_id: String,
    templates: TemplateCatalog,
    token_provider: OnceCell<Arc<dyn TokenProvider>>,
}

impl FcmChannel {
    pub fn new(config: &Config, templates: TemplateCatalog) -> Result<Self, Error> {
        let fcm_project_id = config
            .fcm_project_id
            .clone()
            .ok_or_else(|| anyhow!("FCM_PROJECT_ID is required when push is enabled"))?;

        let http_client = Client::builder()
            .timeout(Duration::from_millis(config.channel_timeout_ms))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(project_id = %fcm_project_id, "FCM client initialized");

        Ok(Self {
            http_client,
            base_url: config.fcm_base_url.trim_end_matches('/').to_string(),
            fcm_project_id,
            templates,
            token_provider: OnceCell::new(),
        })
    }

    pub fn build_request(
        &self,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<FcmRequest, ChannelError> {
        let (title, body) = match &request.content {
            NotificationContent::Template {
                template_code,
                data,
            } => {
                let rendered = self
                    .templates
                    .render(template_code, data)
                    .map_err(|e| ChannelError::Render(e.to_string()))?;
                (rendered.subject, rendered.text)
            }
            NotificationContent::Raw { subject, body } => (subject.clone(), body.clone()),
        };

        let mut data = HashMap::new();
        data.insert(
            "notification_id".to_string(),
            notification_id.as_str().to_string(),
        );

        Ok(FcmRequest {
            message: FcmMessage {
                token: request.recipient.clone(),
                notification: FcmNotification { title, body },
                data: Some(data),
            },
        })
    }

    async fn access_token(&self) -> Result<String, ChannelError> {
        let provider = self
            .token_provider
            .get_or_try_init(|| async { gcp_auth::provider().await })
            .await
            .map_err(|e| ChannelError::Transport(format!("FCM auth unavailable: {}", e)))?;

        let token = provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| ChannelError::Transport(format!("FCM token fetch failed: {}", e)))?;

        Ok(token.as_str().to_string())
    }
}

#[async_trait]
impl NotificationChannel for FcmChannel {
    fn name(&self) -> &str {
        "fcm"
    }

    async fn send(
        &self,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<(), ChannelError> {
        debug!(notification_id = %notification_id, "Sending FCM push notification");

        let payload = self.build_request(notification_id, request)?;
        let token = self.access_token().await?;

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.fcm_project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(notification_id = %notification_id, "FCM push notification sent successfully");
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(ChannelError::Rejected(format!("FCM request failed: {}", error_text)))
        } else {
            Err(ChannelError::Transport(format!(
                "FCM returned {}: {}",
                status, error_text
            )))
        }
    }
}
