use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: String,
    pub sms_provider: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_from: String,
    pub twilio_messaging_service_sid: String,
    pub twilio_base_url: String,
    pub at_username: String,
    pub at_api_key: String,
    pub at_from: String,
    pub at_base_url: String,
    pub reminder_poll_interval_seconds: u64,
    pub reminder_batch_size: u32,
    pub reminder_max_retries: u32,
    pub reminder_retry_backoff_ms: u64,
    pub reminder_stale_claim_seconds: u64,
    pub clinic_utc_offset_minutes: i32,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                String::new()
            });

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, falling back to anon key");
                    supabase_anon_key.clone()
                }),
            supabase_anon_key,
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            sms_provider: env::var("SMS_PROVIDER").unwrap_or_else(|_| "mock".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_from: env::var("TWILIO_FROM").unwrap_or_default(),
            twilio_messaging_service_sid: env::var("TWILIO_MESSAGING_SERVICE_SID").unwrap_or_default(),
            twilio_base_url: env::var("TWILIO_BASE_URL")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
            at_username: env::var("AT_USERNAME").unwrap_or_default(),
            at_api_key: env::var("AT_API_KEY").unwrap_or_default(),
            at_from: env::var("AT_FROM").unwrap_or_default(),
            at_base_url: env::var("AT_BASE_URL")
                .unwrap_or_else(|_| "https://api.africastalking.com".to_string()),
            reminder_poll_interval_seconds: parse_var("REMINDER_POLL_INTERVAL_SECONDS", 60),
            reminder_batch_size: parse_var("REMINDER_BATCH_SIZE", 50),
            reminder_max_retries: parse_var("REMINDER_MAX_RETRIES", 2),
            reminder_retry_backoff_ms: parse_var("REMINDER_RETRY_BACKOFF_MS", 1000),
            reminder_stale_claim_seconds: parse_var("REMINDER_STALE_CLAIM_SECONDS", 900),
            clinic_utc_offset_minutes: parse_var("CLINIC_UTC_OFFSET_MINUTES", 0),
            port: parse_var("PORT", 4000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if !config.is_sms_configured() {
            warn!("SMS provider '{}' selected but credentials are missing", config.sms_provider);
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_sms_configured(&self) -> bool {
        match self.sms_provider.as_str() {
            "twilio" => {
                !self.twilio_account_sid.is_empty()
                    && !self.twilio_auth_token.is_empty()
                    && (!self.twilio_from.is_empty() || !self.twilio_messaging_service_sid.is_empty())
            }
            "africastalking" => !self.at_username.is_empty() && !self.at_api_key.is_empty(),
            _ => true,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
