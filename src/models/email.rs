use serde::{Deserialize, Serialize};

/// Body posted to the mail relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRelayRequest {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}
