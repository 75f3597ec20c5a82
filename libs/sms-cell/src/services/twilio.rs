// libs/sms-cell/src/services/twilio.rs
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{SmsError, SmsSendResult, TwilioMessageResponse};
use crate::services::SmsAdapter;

/// Twilio Programmable Messaging client.
/// POST {base}/2010-04-01/Accounts/{AccountSid}/Messages.json
pub struct TwilioAdapter {
    client: Client,
    account_sid: String,
    auth_token: String,
    from: String,
    messaging_service_sid: String,
    base_url: String,
}

impl TwilioAdapter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from: config.twilio_from.clone(),
            messaging_service_sid: config.twilio_messaging_service_sid.clone(),
            base_url: config.twilio_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn ensure_configured(&self) -> Result<(), SmsError> {
        let mut missing = Vec::new();
        if self.account_sid.is_empty() {
            missing.push("TWILIO_ACCOUNT_SID");
        }
        if self.auth_token.is_empty() {
            missing.push("TWILIO_AUTH_TOKEN");
        }
        if self.from.is_empty() && self.messaging_service_sid.is_empty() {
            missing.push("TWILIO_FROM or TWILIO_MESSAGING_SERVICE_SID");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SmsError::NotConfigured {
                provider: "twilio".to_string(),
                missing: missing.join(", "),
            })
        }
    }
}

#[async_trait]
impl SmsAdapter for TwilioAdapter {
    fn provider(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, to: &str, message: &str) -> Result<SmsSendResult, SmsError> {
        self.ensure_configured()?;

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );

        // A messaging service takes precedence over a bare sender number.
        let mut form = vec![("To", to), ("Body", message)];
        if !self.messaging_service_sid.is_empty() {
            form.push(("MessagingServiceSid", self.messaging_service_sid.as_str()));
        } else {
            form.push(("From", self.from.as_str()));
        }

        debug!("Sending Twilio message request to: {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            error!("[Twilio] Send failed: {} - {}", status, response_text);
            return Err(SmsError::ProviderApi {
                provider: "twilio".to_string(),
                status: status.as_u16(),
                message: response_text,
            });
        }

        let parsed: TwilioMessageResponse = serde_json::from_str(&response_text)
            .map_err(|e| SmsError::InvalidResponse {
                provider: "twilio".to_string(),
                message: e.to_string(),
            })?;

        info!("[Twilio] SMS sent: {}", parsed.sid);

        Ok(SmsSendResult {
            success: true,
            provider: "twilio".to_string(),
            message_id: Some(parsed.sid),
            status: parsed.status,
            result: serde_json::from_str(&response_text).ok(),
        })
    }
}
