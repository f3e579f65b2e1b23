use anyhow::{Result, anyhow};

use crate::{
    clients::template::TemplateCatalog,
    error::DeliveryError,
    models::notification::{NotificationContent, NotificationKind, NotificationRequest},
};

pub fn validate_fcm_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(anyhow!("Device token too short (minimum 20 characters)"));
    }

    if token.len() > 200 {
        return Err(anyhow!("Device token too long (maximum 200 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(anyhow!("Device token contains invalid characters"));
    }

    Ok(())
}

pub fn validate_email_address(address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(anyhow!("Recipient email cannot be empty"));
    }

    if address.len() > 254 || address.chars().any(char::is_whitespace) {
        return Err(anyhow!("Recipient email is malformed"));
    }

    let (local, domain) = address
        .rsplit_once('@')
        .ok_or_else(|| anyhow!("Recipient email must contain '@'"))?;

    if local.is_empty() || local.contains('@') {
        return Err(anyhow!("Recipient email has an invalid local part"));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(anyhow!("Recipient email has an invalid domain"));
    }

    Ok(())
}

/// Checks a request before any channel sees it.
pub fn validate_request(
    request: &NotificationRequest,
    catalog: &TemplateCatalog,
) -> Result<(), DeliveryError> {
    let recipient_check = match request.kind {
        NotificationKind::Email => validate_email_address(&request.recipient),
        NotificationKind::Push => validate_fcm_token(&request.recipient),
    };
    recipient_check.map_err(|e| DeliveryError::Validation(e.to_string()))?;

    match &request.content {
        NotificationContent::Template {
            template_code,
            data,
        } => {
            if template_code.is_empty() {
                return Err(DeliveryError::Validation(
                    "Template code cannot be empty".to_string(),
                ));
            }

            let template = catalog.get(template_code).ok_or_else(|| {
                DeliveryError::Validation(format!("Unknown template: {}", template_code))
            })?;

            let missing: Vec<&str> = template
                .required_fields
                .iter()
                .filter(|field| match data.get(field.as_str()) {
                    None | Some(serde_json::Value::Null) => true,
                    Some(serde_json::Value::String(s)) => s.is_empty(),
                    Some(_) => false,
                })
                .map(String::as_str)
                .collect();

            if !missing.is_empty() {
                return Err(DeliveryError::Validation(format!(
                    "Missing required template fields: {}",
                    missing.join(", ")
                )));
            }
        }
        NotificationContent::Raw { subject, body } => {
            if subject.trim().is_empty() || body.trim().is_empty() {
                return Err(DeliveryError::Validation(
                    "Subject and body are required".to_string(),
                ));
            }
        }
    }

    Ok(())
}
