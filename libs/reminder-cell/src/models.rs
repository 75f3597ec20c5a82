use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_config::AppConfig;

// ==============================================================================
// REMINDER RECORDS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_phone: String,
    pub scheduled_send_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    pub status: ReminderStatus,
    pub offset: ReminderOffset,
    #[serde(default)]
    pub provider_response: Option<Value>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Scheduled,
    /// Claimed by a delivery worker; no other worker may pick it up.
    Sending,
    Sent,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Scheduled => "scheduled",
            ReminderStatus::Sending => "sending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ReminderStatus::Scheduled),
            "sending" => Ok(ReminderStatus::Sending),
            "sent" => Ok(ReminderStatus::Sent),
            "failed" => Ok(ReminderStatus::Failed),
            other => Err(format!("Unknown reminder status: {}", other)),
        }
    }
}

/// How long before the appointment a reminder goes out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReminderOffset {
    #[serde(rename = "48h")]
    FortyEightHours,
    #[serde(rename = "24h")]
    TwentyFourHours,
    #[serde(rename = "2h")]
    TwoHours,
}

impl ReminderOffset {
    pub const ALL: [ReminderOffset; 3] = [
        ReminderOffset::FortyEightHours,
        ReminderOffset::TwentyFourHours,
        ReminderOffset::TwoHours,
    ];

    pub fn hours(&self) -> i64 {
        match self {
            ReminderOffset::FortyEightHours => 48,
            ReminderOffset::TwentyFourHours => 24,
            ReminderOffset::TwoHours => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderOffset::FortyEightHours => "48h",
            ReminderOffset::TwentyFourHours => "24h",
            ReminderOffset::TwoHours => "2h",
        }
    }

    pub fn send_time(&self, scheduled_at: DateTime<Utc>) -> DateTime<Utc> {
        scheduled_at - Duration::hours(self.hours())
    }
}

impl fmt::Display for ReminderOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send times for every offset, in offset order. Times already in the past are
/// kept; the worker picks them up on its next poll.
pub fn compute_send_times(scheduled_at: DateTime<Utc>) -> Vec<(ReminderOffset, DateTime<Utc>)> {
    ReminderOffset::ALL
        .iter()
        .map(|offset| (*offset, offset.send_time(scheduled_at)))
        .collect()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReminderQuery {
    pub status: Option<ReminderStatus>,
    pub limit: Option<u32>,
    #[serde(alias = "facilityId")]
    pub facility_id: Option<Uuid>,
}

impl ReminderQuery {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 200;

    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

// ==============================================================================
// DELIVERY WORKER
// ==============================================================================

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval_seconds: u64,
    pub batch_size: u32,
    /// Extra attempts after the first send fails.
    pub max_retries: u32,
    /// Linear backoff unit: attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    /// Rows left in `sending` longer than this are given up as failed.
    pub stale_claim_seconds: u64,
    pub clinic_utc_offset_minutes: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("reminder-worker-{}", Uuid::new_v4()),
            poll_interval_seconds: 60,
            batch_size: 50,
            max_retries: 2,
            retry_backoff_ms: 1000,
            stale_claim_seconds: 900,
            clinic_utc_offset_minutes: 0,
        }
    }
}

impl WorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            poll_interval_seconds: config.reminder_poll_interval_seconds.max(1),
            batch_size: config.reminder_batch_size.max(1),
            max_retries: config.reminder_max_retries,
            retry_backoff_ms: config.reminder_retry_backoff_ms,
            stale_claim_seconds: config.reminder_stale_claim_seconds.max(60),
            clinic_utc_offset_minutes: config.clinic_utc_offset_minutes,
            ..Self::default()
        }
    }
}

/// Outcome counts for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub due: usize,
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub lost_claims: usize,
    pub reclaimed: usize,
}

/// What the worker needs to know about the appointment a reminder belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentSnapshot {
    pub id: Uuid,
    pub facility_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
}

impl AppointmentSnapshot {
    pub fn is_closed(&self) -> bool {
        matches!(self.status.as_str(), "canceled" | "completed")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Sent { message_id: Option<String> },
    Failed { error: String },
    Skipped { reason: String },
}

// ==============================================================================
// DELIVERY RECEIPTS
// ==============================================================================

/// Provider-neutral view of a delivery-status callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
    pub status: Option<String>,
    pub phone: Option<String>,
}

impl DeliveryReceipt {
    /// Accepts Africa's Talking callbacks (`id`/`messageId`, `status`,
    /// `phoneNumber`/`number`), Twilio status callbacks (`MessageSid`,
    /// `MessageStatus`, `To`) and the nested `SMSMessageData.Recipients` shape.
    pub fn from_payload(payload: &Value) -> Self {
        let recipient = payload
            .pointer("/SMSMessageData/Recipients/0")
            .cloned()
            .unwrap_or(Value::Null);

        let pick = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|key| payload.get(*key).or_else(|| recipient.get(*key)))
                .and_then(|value| match value {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };

        Self {
            message_id: pick(&["messageId", "id", "MessageSid", "SmsSid"]),
            status: pick(&["status", "MessageStatus", "SmsStatus"]),
            phone: pick(&["phoneNumber", "number", "To", "to"]),
        }
    }

    /// Maps a provider status onto a reminder status. Failure words win over
    /// "delivered" so "undelivered" never reads as success.
    pub fn classify(&self) -> Option<ReminderStatus> {
        let status = self.status.as_deref()?.to_lowercase();

        if ["failed", "undelivered", "rejected"].iter().any(|w| status.contains(w)) {
            Some(ReminderStatus::Failed)
        } else if status.contains("delivered") || status == "success" {
            Some(ReminderStatus::Sent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn send_times_for_each_offset() {
        let times = compute_send_times(at("2025-03-10T14:00:00Z"));

        assert_eq!(
            times,
            vec![
                (ReminderOffset::FortyEightHours, at("2025-03-08T14:00:00Z")),
                (ReminderOffset::TwentyFourHours, at("2025-03-09T14:00:00Z")),
                (ReminderOffset::TwoHours, at("2025-03-10T12:00:00Z")),
            ]
        );
    }

    #[test]
    fn offsets_serialize_as_short_labels() {
        assert_eq!(json!(ReminderOffset::TwoHours), json!("2h"));
        let parsed: ReminderOffset = serde_json::from_value(json!("48h")).unwrap();
        assert_eq!(parsed, ReminderOffset::FortyEightHours);
    }

    #[test]
    fn query_limit_is_clamped() {
        assert_eq!(ReminderQuery::default().effective_limit(), 50);
        let query = ReminderQuery { limit: Some(10_000), ..Default::default() };
        assert_eq!(query.effective_limit(), 200);
        let query = ReminderQuery { limit: Some(0), ..Default::default() };
        assert_eq!(query.effective_limit(), 1);
    }

    #[test]
    fn receipt_from_africastalking_callback() {
        let receipt = DeliveryReceipt::from_payload(&json!({
            "id": "ATXid_1",
            "status": "Success",
            "phoneNumber": "+255712345678",
            "networkCode": "64002"
        }));

        assert_eq!(receipt.message_id.as_deref(), Some("ATXid_1"));
        assert_eq!(receipt.phone.as_deref(), Some("+255712345678"));
        assert_eq!(receipt.classify(), Some(ReminderStatus::Sent));
    }

    #[test]
    fn receipt_from_twilio_callback() {
        let receipt = DeliveryReceipt::from_payload(&json!({
            "MessageSid": "SM1",
            "MessageStatus": "undelivered",
            "To": "+255712345678"
        }));

        assert_eq!(receipt.message_id.as_deref(), Some("SM1"));
        assert_eq!(receipt.classify(), Some(ReminderStatus::Failed));
    }

    #[test]
    fn receipt_from_nested_recipients() {
        let receipt = DeliveryReceipt::from_payload(&json!({
            "SMSMessageData": {
                "Recipients": [{ "messageId": "ATXid_2", "number": "+255700000001", "status": "Rejected" }]
            }
        }));

        assert_eq!(receipt.message_id.as_deref(), Some("ATXid_2"));
        assert_eq!(receipt.phone.as_deref(), Some("+255700000001"));
        assert_eq!(receipt.classify(), Some(ReminderStatus::Failed));
    }

    #[test]
    fn unknown_status_is_not_classified() {
        let receipt = DeliveryReceipt::from_payload(&json!({ "messageId": "x", "status": "Buffered" }));
        assert_eq!(receipt.classify(), None);
        assert!(DeliveryReceipt::from_payload(&json!({})).message_id.is_none());
    }

    #[test]
    fn closed_appointments() {
        let snapshot = |status: &str| AppointmentSnapshot {
            id: Uuid::new_v4(),
            facility_id: None,
            scheduled_at: Utc::now(),
            status: status.to_string(),
        };

        assert!(snapshot("canceled").is_closed());
        assert!(snapshot("completed").is_closed());
        assert!(!snapshot("confirmed").is_closed());
        assert!(!snapshot("reschedule_pending_patient").is_closed());
    }
}
