// libs/sms-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Uniform outcome of a provider send. Provider-level delivery statuses
/// (e.g. an invalid recipient reported inside a 2xx body) land in `status`
/// rather than in an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmsSendResult {
    pub success: bool,
    pub provider: String,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsProviderKind {
    Mock,
    Twilio,
    AfricasTalking,
}

impl SmsProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsProviderKind::Mock => "mock",
            SmsProviderKind::Twilio => "twilio",
            SmsProviderKind::AfricasTalking => "africastalking",
        }
    }
}

impl fmt::Display for SmsProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmsProviderKind {
    type Err = SmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(SmsProviderKind::Mock),
            "twilio" => Ok(SmsProviderKind::Twilio),
            "africastalking" | "africas_talking" => Ok(SmsProviderKind::AfricasTalking),
            other => Err(SmsError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("Unknown SMS provider: {0}")]
    UnknownProvider(String),

    #[error("SMS provider {provider} is not configured: {missing}")]
    NotConfigured { provider: String, missing: String },

    #[error("Invalid destination phone number: {0}")]
    InvalidDestination(String),

    #[error("SMS transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("SMS provider {provider} rejected the request ({status}): {message}")]
    ProviderApi {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Unreadable response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl SmsError {
    /// Configuration, addressing and client-side provider errors fail the same
    /// way on every attempt. Rate limiting (429) is worth waiting out.
    pub fn is_retryable(&self) -> bool {
        match self {
            SmsError::UnknownProvider(_) | SmsError::NotConfigured { .. } | SmsError::InvalidDestination(_) => false,
            SmsError::ProviderApi { status, .. } => !(400..500).contains(status) || *status == 429,
            SmsError::Transport(_) | SmsError::InvalidResponse { .. } => true,
        }
    }
}

/// Twilio `POST /Messages.json` response (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioMessageResponse {
    pub sid: String,
    pub status: Option<String>,
}

/// Africa's Talking `POST /version1/messaging` response.
#[derive(Debug, Clone, Deserialize)]
pub struct AfricasTalkingResponse {
    #[serde(rename = "SMSMessageData")]
    pub sms_message_data: AfricasTalkingMessageData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AfricasTalkingMessageData {
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Recipients", default)]
    pub recipients: Vec<AfricasTalkingRecipient>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AfricasTalkingRecipient {
    #[serde(rename = "statusCode")]
    pub status_code: Option<i64>,
    pub number: Option<String>,
    pub status: Option<String>,
    pub cost: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_retried() {
        assert!(!SmsError::InvalidDestination("x".into()).is_retryable());
        assert!(!SmsError::NotConfigured { provider: "twilio".into(), missing: "sid".into() }.is_retryable());
        assert!(SmsError::ProviderApi { provider: "twilio".into(), status: 503, message: String::new() }.is_retryable());
        assert!(SmsError::ProviderApi { provider: "twilio".into(), status: 429, message: String::new() }.is_retryable());
        assert!(!SmsError::ProviderApi { provider: "twilio".into(), status: 400, message: String::new() }.is_retryable());
        assert!(!SmsError::ProviderApi { provider: "africastalking".into(), status: 401, message: String::new() }.is_retryable());
    }

    #[test]
    fn provider_kind_parses_config_names() {
        assert_eq!("mock".parse::<SmsProviderKind>().unwrap(), SmsProviderKind::Mock);
        assert_eq!("Twilio".parse::<SmsProviderKind>().unwrap(), SmsProviderKind::Twilio);
        assert_eq!(
            "africastalking".parse::<SmsProviderKind>().unwrap(),
            SmsProviderKind::AfricasTalking
        );
        assert!("carrier-pigeon".parse::<SmsProviderKind>().is_err());
    }

    #[test]
    fn send_result_serializes_message_id_in_camel_case() {
        let result = SmsSendResult {
            success: true,
            provider: "mock".to_string(),
            message_id: Some("mock_1".to_string()),
            status: None,
            result: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["messageId"], "mock_1");
        assert!(json.get("status").is_none());
    }
}
