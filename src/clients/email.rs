use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::{
    clients::{channel::NotificationChannel, template::TemplateCatalog},
    config::Config,
    error::ChannelError,
    models::{
        notification::{NotificationContent, NotificationId, NotificationRequest},
        template::TemplateContent,
    },
};

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Upgrade with STARTTLS. Plaintext when false.
    pub starttls: bool,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let host = config
            .email_smtp_host
            .clone()
            .ok_or_else(|| anyhow!("EMAIL_SMTP_HOST is required when email is enabled"))?;

        Ok(Self {
            host,
            port: config.email_smtp_port,
            username: config.email_username.clone(),
            password: config.email_password.clone(),
            starttls: config.email_smtp_starttls,
            timeout: config.channel_timeout(),
        })
    }
}

/// Sends email over SMTP submission.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    templates: TemplateCatalog,
}

impl EmailChannel {
    pub fn new(config: &Config, templates: TemplateCatalog) -> Result<Self, Error> {
        Self::with_smtp(
            SmtpSettings::from_config(config)?,
            config.sender_address(),
            templates,
        )
    }

    pub fn with_smtp(
        settings: SmtpSettings,
        from: &str,
        templates: TemplateCatalog,
    ) -> Result<Self, Error> {
        let builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| anyhow!("Invalid SMTP host {}: {}", settings.host, e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host.as_str())
        };

        let mut builder = builder
            .port(settings.port)
            .timeout(Some(settings.timeout));

        if let (Some(username), Some(password)) = (settings.username, settings.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        let from = from
            .parse::<Mailbox>()
            .map_err(|e| anyhow!("Invalid sender address {}: {}", from, e))?;

        info!(
            smtp_host = %settings.host,
            smtp_port = settings.port,
            starttls = settings.starttls,
            from = %from,
            "Email channel initialized"
        );

        Ok(Self {
            transport: builder.build(),
            from,
            templates,
        })
    }

    fn compose(
        &self,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<Message, ChannelError> {
        let content = render_content(&self.templates, request)?;

        let to = request.recipient.parse::<Mailbox>().map_err(|e| {
            ChannelError::Rejected(format!("Invalid recipient {}: {}", request.recipient, e))
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(content.subject)
            .message_id(Some(format!(
                "<{}@{}>",
                notification_id,
                self.from.email.domain()
            )))
            .multipart(MultiPart::alternative_plain_html(content.text, content.html))
            .map_err(|e| ChannelError::Render(e.to_string()))
    }
}

/// Renders a template request, or passes raw content through for both parts.
pub fn render_content(
    templates: &TemplateCatalog,
    request: &NotificationRequest,
) -> Result<TemplateContent, ChannelError> {
    match &request.content {
        NotificationContent::Template {
            template_code,
            data,
        } => templates
            .render(template_code, data)
            .map_err(|e| ChannelError::Render(e.to_string())),
        NotificationContent::Raw { subject, body } => Ok(TemplateContent {
            subject: subject.clone(),
            html: body.clone(),
            text: body.clone(),
        }),
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(
        &self,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<(), ChannelError> {
        let message = self.compose(notification_id, request)?;

        debug!(
            notification_id = %notification_id,
            template_code = request.template_code().unwrap_or("raw"),
            "Sending email over SMTP"
        );

        let response = self.transport.send(message).await?;

        info!(
            notification_id = %notification_id,
            code = %response.code(),
            "Email accepted by SMTP server"
        );
        Ok(())
    }
}
