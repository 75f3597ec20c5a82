use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use sms_cell::SmsSendResult;

use crate::error::ReminderError;
use crate::models::{compute_send_times, Reminder, ReminderOffset, ReminderStatus};
use crate::services::store::ReminderStore;

pub struct ReminderSchedulerService {
    store: ReminderStore,
}

impl ReminderSchedulerService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: ReminderStore::new(Arc::new(SupabaseClient::new(config))),
        }
    }

    pub fn with_store(store: ReminderStore) -> Self {
        Self { store }
    }

    /// Writes one row per offset. Re-running for the same appointment re-arms
    /// the existing rows at the new send times instead of adding duplicates.
    pub async fn schedule_reminders(
        &self,
        appointment_id: Uuid,
        patient_phone: &str,
        scheduled_at: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Reminder>, ReminderError> {
        if patient_phone.trim().is_empty() {
            return Err(ReminderError::ValidationError(
                "Patient phone is required to schedule reminders".to_string(),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let rows: Vec<Value> = compute_send_times(scheduled_at)
            .into_iter()
            .map(|(offset, send_at)| {
                json!({
                    "appointment_id": appointment_id,
                    "patient_phone": patient_phone,
                    "scheduled_send_at": send_at.to_rfc3339(),
                    "offset": offset,
                    "status": ReminderStatus::Scheduled,
                    "sent_at": null,
                    "provider_response": null,
                    "provider_message_id": null,
                    "updated_at": now,
                })
            })
            .collect();

        let reminders = self.store.upsert(rows, auth_token).await?;

        if reminders.len() != ReminderOffset::ALL.len() {
            warn!(
                "Expected {} reminders for appointment {}, store returned {}",
                ReminderOffset::ALL.len(),
                appointment_id,
                reminders.len()
            );
        }

        info!(
            "Scheduled {} reminders for appointment {} at {}",
            reminders.len(),
            appointment_id,
            scheduled_at
        );

        Ok(reminders)
    }

    /// Records an ad-hoc send in the `2h` slot so test messages show up in the
    /// reminder log without creating extra rows.
    pub async fn record_adhoc_send(
        &self,
        appointment_id: Uuid,
        patient_phone: &str,
        result: &SmsSendResult,
        auth_token: &str,
    ) -> Result<Option<Reminder>, ReminderError> {
        let now = Utc::now().to_rfc3339();
        let row = json!({
            "appointment_id": appointment_id,
            "patient_phone": patient_phone,
            "scheduled_send_at": now,
            "offset": ReminderOffset::TwoHours,
            "status": ReminderStatus::Sent,
            "sent_at": now,
            "provider_response": serde_json::to_value(result)?,
            "provider_message_id": result.message_id,
            "updated_at": now,
        });

        let mut reminders = self.store.upsert(vec![row], auth_token).await?;
        Ok(reminders.pop())
    }
}
