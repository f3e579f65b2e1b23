use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::{channel::NotificationChannel, email::render_content, template::TemplateCatalog},
    config::Config,
    error::ChannelError,
    models::{
        email::MailRelayRequest,
        notification::{NotificationId, NotificationRequest},
    },
};

pub const NOTIFICATION_ID_HEADER: &str = "X-Notification-Id";

/// Sends email through an HTTP mail relay.
pub struct RelayEmailChannel {
    http_client: Client,
    relay_url: String,
    api_key: Option<String>,
    from: String,
    templates: TemplateCatalog,
}

impl RelayEmailChannel {
    pub fn new(config: &Config, templates: TemplateCatalog) -> Result<Self, Error> {
        let relay_url = config
            .mail_relay_url
            .clone()
            .ok_or_else(|| anyhow!("MAIL_RELAY_URL is required for the relay transport"))?;

        Self::with_relay(
            relay_url,
            config.mail_relay_api_key.clone(),
            config.sender_address().to_string(),
            config.channel_timeout(),
            templates,
        )
    }

    pub fn with_relay(
        relay_url: String,
        api_key: Option<String>,
        from: String,
        timeout: Duration,
        templates: TemplateCatalog,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(relay_url = %relay_url, from = %from, "Mail relay channel initialized");

        Ok(Self {
            http_client,
            relay_url,
            api_key,
            from,
            templates,
        })
    }

    fn compose(&self, request: &NotificationRequest) -> Result<MailRelayRequest, ChannelError> {
        let content = render_content(&self.templates, request)?;

        Ok(MailRelayRequest {
            from: self.from.clone(),
            to: vec![request.recipient.clone()],
            subject: content.subject,
            html: content.html,
            text: content.text,
        })
    }
}

#[async_trait]
impl NotificationChannel for RelayEmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(
        &self,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<(), ChannelError> {
        let mail = self.compose(request)?;

        debug!(
            notification_id = %notification_id,
            template_code = request.template_code().unwrap_or("raw"),
            "Sending email through relay"
        );

        let mut builder = self
            .http_client
            .post(&self.relay_url)
            .header(NOTIFICATION_ID_HEADER, notification_id.as_str())
            .json(&mail);

        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            info!(notification_id = %notification_id, "Email accepted by relay");
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(ChannelError::Rejected(format!("{}: {}", status, error_text)))
        } else {
            Err(ChannelError::Transport(format!(
                "Relay returned {}: {}",
                status, error_text
            )))
        }
    }
}
