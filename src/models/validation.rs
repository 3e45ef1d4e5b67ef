use anyhow::{Result, anyhow};

use crate::models::message::PushMessage;

/// Required-field check for an already-parsed wire message. Serde rejects
/// structurally missing fields; this catches fields present but empty,
/// which can never be delivered either.
pub fn validate_message(message: &PushMessage) -> Result<()> {
    if message.request_id.is_empty() {
        return Err(anyhow!("Missing request_id"));
    }

    if message.recipient_id.is_empty() {
        return Err(anyhow!("Missing recipient_id"));
    }

    if message.payload.title.is_empty() {
        return Err(anyhow!("Missing payload.title"));
    }

    if message.payload.body.is_empty() {
        return Err(anyhow!("Missing payload.body"));
    }

    validate_device_token(&message.device_token)
}

pub fn validate_device_token(token: &str) -> Result<()> {
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
