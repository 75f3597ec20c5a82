use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::models::{SmsError, SmsSendResult};
use crate::services::SmsAdapter;

/// Always succeeds; used for local development and tests.
pub struct MockAdapter;

#[async_trait]
impl SmsAdapter for MockAdapter {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, to: &str, message: &str) -> Result<SmsSendResult, SmsError> {
        let now = Utc::now();
        info!("[Mock SMS] To: {} Message: {}", to, message);

        Ok(SmsSendResult {
            success: true,
            provider: "mock".to_string(),
            message_id: Some(format!("mock_{}", now.timestamp_millis())),
            status: Some("sent".to_string()),
            result: Some(json!({
                "to": to,
                "message": message,
                "timestamp": now.to_rfc3339(),
            })),
        })
    }
}
