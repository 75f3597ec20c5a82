// libs/sms-cell/src/services/africastalking.rs
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{AfricasTalkingResponse, SmsError, SmsSendResult};
use crate::services::SmsAdapter;

/// Africa's Talking bulk SMS client.
/// POST {base}/version1/messaging (form-encoded, `apiKey` header)
pub struct AfricasTalkingAdapter {
    client: Client,
    username: String,
    api_key: String,
    from: String,
    base_url: String,
}

impl AfricasTalkingAdapter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            username: config.at_username.clone(),
            api_key: config.at_api_key.clone(),
            from: config.at_from.clone(),
            base_url: config.at_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SmsAdapter for AfricasTalkingAdapter {
    fn provider(&self) -> &'static str {
        "africastalking"
    }

    async fn send(&self, to: &str, message: &str) -> Result<SmsSendResult, SmsError> {
        if self.username.is_empty() || self.api_key.is_empty() {
            return Err(SmsError::NotConfigured {
                provider: "africastalking".to_string(),
                missing: "AT_USERNAME, AT_API_KEY".to_string(),
            });
        }

        let url = format!("{}/version1/messaging", self.base_url);

        let mut form = vec![
            ("username", self.username.as_str()),
            ("to", to),
            ("message", message),
        ];
        if !self.from.is_empty() {
            form.push(("from", self.from.as_str()));
        }

        debug!("Sending Africa's Talking request to: {}", url);

        let response = self
            .client
            .post(&url)
            .header("apiKey", &self.api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            error!("[Africa's Talking] Send failed: {} - {}", status, response_text);
            return Err(SmsError::ProviderApi {
                provider: "africastalking".to_string(),
                status: status.as_u16(),
                message: response_text,
            });
        }

        let raw: Value = serde_json::from_str(&response_text)
            .map_err(|e| SmsError::InvalidResponse {
                provider: "africastalking".to_string(),
                message: e.to_string(),
            })?;
        let parsed: AfricasTalkingResponse = serde_json::from_value(raw.clone())
            .map_err(|e| SmsError::InvalidResponse {
                provider: "africastalking".to_string(),
                message: e.to_string(),
            })?;

        let recipient = parsed.sms_message_data.recipients.first();
        let message_id = recipient.and_then(|r| r.message_id.clone());
        let recipient_status = recipient.and_then(|r| r.status.clone());

        match &recipient_status {
            Some(s) if s.eq_ignore_ascii_case("success") => {
                info!("[Africa's Talking] SMS sent: {:?}", message_id);
            }
            other => {
                // Per-recipient failures are reported in-band; surface them
                // through `status` without failing the call.
                warn!(
                    "[Africa's Talking] Recipient status {:?}: {}",
                    other, parsed.sms_message_data.message
                );
            }
        }

        Ok(SmsSendResult {
            success: true,
            provider: "africastalking".to_string(),
            message_id,
            status: recipient_status,
            result: Some(raw),
        })
    }
}
