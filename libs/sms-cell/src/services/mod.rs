pub mod mock;
pub mod twilio;
pub mod africastalking;

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{error, info, warn};

use shared_config::AppConfig;

use crate::models::{SmsError, SmsProviderKind, SmsSendResult};

pub use africastalking::AfricasTalkingAdapter;
pub use mock::MockAdapter;
pub use twilio::TwilioAdapter;

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?\d{7,15}$").expect("phone pattern is valid")
});

/// One capability shared by every SMS backend.
#[async_trait]
pub trait SmsAdapter: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn send(&self, to: &str, message: &str) -> Result<SmsSendResult, SmsError>;
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN.is_match(phone)
}

/// Entry point used by the rest of the system. The backend is chosen once from
/// configuration; callers never see which one is active.
#[derive(Clone)]
pub struct SmsService {
    adapter: Arc<dyn SmsAdapter>,
}

impl SmsService {
    pub fn new(config: &AppConfig) -> Self {
        let kind = config.sms_provider.parse::<SmsProviderKind>().unwrap_or_else(|e| {
            warn!("{}; falling back to mock SMS provider", e);
            SmsProviderKind::Mock
        });

        Self::for_provider(kind, config)
    }

    pub fn for_provider(kind: SmsProviderKind, config: &AppConfig) -> Self {
        let adapter: Arc<dyn SmsAdapter> = match kind {
            SmsProviderKind::Mock => Arc::new(MockAdapter),
            SmsProviderKind::Twilio => Arc::new(TwilioAdapter::new(config)),
            SmsProviderKind::AfricasTalking => Arc::new(AfricasTalkingAdapter::new(config)),
        };

        Self { adapter }
    }

    pub fn with_adapter(adapter: Arc<dyn SmsAdapter>) -> Self {
        Self { adapter }
    }

    pub fn provider(&self) -> &'static str {
        self.adapter.provider()
    }

    pub async fn send_sms(&self, to: &str, message: &str) -> Result<SmsSendResult, SmsError> {
        if !is_valid_phone(to) {
            warn!("[SMS Service] Refusing to send to invalid number {}", to);
            return Err(SmsError::InvalidDestination(to.to_string()));
        }

        info!("[SMS Service] Sending SMS via {} to {}", self.provider(), to);

        match self.adapter.send(to, message).await {
            Ok(result) => {
                info!(
                    "[SMS Service] {} accepted message (id: {:?}, status: {:?})",
                    result.provider, result.message_id, result.status
                );
                Ok(result)
            }
            Err(e) => {
                error!("[SMS Service] {} send failed: {}", self.provider(), e);
                Err(e)
            }
        }
    }
}
