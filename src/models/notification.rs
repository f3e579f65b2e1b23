use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{error::DeliveryError, utils::generate_notification_id};

/// Closed set of delivery kinds. Each kind is served by one registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
    Push,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 2] = [NotificationKind::Email, NotificationKind::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Email => "email",
            NotificationKind::Push => "push",
        }
    }
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(NotificationKind::Email),
            "push" => Ok(NotificationKind::Push),
            other => Err(DeliveryError::UnsupportedKind(other.to_string())),
        }
    }
}

/// What gets delivered: either a catalogue template filled with data, or a
/// ready-made subject and body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationContent {
    Template {
        template_code: String,
        #[serde(default)]
        data: HashMap<String, serde_json::Value>,
    },
    Raw {
        subject: String,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipient: String,
    pub kind: NotificationKind,
    pub content: NotificationContent,

    #[serde(default)]
    pub allow_fallback: bool,
}

impl NotificationRequest {
    pub fn email_template(
        recipient: impl Into<String>,
        template_code: impl Into<String>,
        data: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            kind: NotificationKind::Email,
            content: NotificationContent::Template {
                template_code: template_code.into(),
                data,
            },
            allow_fallback: false,
        }
    }

    pub fn raw(
        kind: NotificationKind,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            kind,
            content: NotificationContent::Raw {
                subject: subject.into(),
                body: body.into(),
            },
            allow_fallback: false,
        }
    }

    pub fn with_fallback(mut self, allow_fallback: bool) -> Self {
        self.allow_fallback = allow_fallback;
        self
    }

    pub fn template_code(&self) -> Option<&str> {
        match &self.content {
            NotificationContent::Template { template_code, .. } => Some(template_code),
            NotificationContent::Raw { .. } => None,
        }
    }
}

/// Identifier minted once per accepted request and carried through every
/// redelivery, so callers can deduplicate on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn generate() -> Self {
        Self(generate_notification_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NotificationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for NotificationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
