use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::ReminderError;
use crate::models::{DeliveryReceipt, Reminder, ReminderStatus};
use crate::services::store::ReminderStore;

/// Applies provider delivery callbacks to reminder rows.
pub struct DeliveryReceiptService {
    store: ReminderStore,
    service_token: String,
}

impl DeliveryReceiptService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: ReminderStore::new(Arc::new(SupabaseClient::new(config))),
            service_token: config.supabase_service_role_key.clone(),
        }
    }

    /// Returns the updated reminder, or `None` when the receipt could not be
    /// matched to one.
    pub async fn process(&self, payload: &Value) -> Result<Option<Reminder>, ReminderError> {
        let receipt = DeliveryReceipt::from_payload(payload);
        debug!("Delivery receipt: {:?}", receipt);

        let Some(message_id) = receipt.message_id.as_deref() else {
            warn!("Delivery receipt without message id (phone: {:?})", receipt.phone);
            return Ok(None);
        };

        let Some(reminder) = self.correlate(message_id, receipt.phone.as_deref()).await? else {
            warn!(
                "No reminder matches receipt (message id: {}, phone: {:?})",
                message_id, receipt.phone
            );
            return Ok(None);
        };

        let mut update = json!({
            "provider_response": {
                "receipt": payload,
                "received_at": Utc::now().to_rfc3339(),
            },
            "updated_at": Utc::now().to_rfc3339(),
        });

        if let Some(status) = receipt.classify() {
            update["status"] = json!(status);
            if status == ReminderStatus::Sent && reminder.sent_at.is_none() {
                update["sent_at"] = json!(Utc::now().to_rfc3339());
            }
        }

        if reminder.provider_message_id.is_none() {
            update["provider_message_id"] = json!(message_id);
        }

        let updated = self.store.apply_receipt(reminder.id, update, &self.service_token).await?;
        if updated.is_none() {
            debug!("Reminder {} went back to scheduled before its receipt was applied", reminder.id);
        }

        info!(
            "Applied delivery receipt to reminder {} (status: {:?})",
            reminder.id, receipt.status
        );

        Ok(updated)
    }

    async fn correlate(&self, message_id: &str, phone: Option<&str>) -> Result<Option<Reminder>, ReminderError> {
        if let Some(reminder) = self
            .store
            .find_by_provider_message_id(message_id, &self.service_token)
            .await?
        {
            return Ok(Some(reminder));
        }

        match phone {
            Some(phone) => self.store.find_latest_dispatched_for_phone(phone, &self.service_token).await,
            None => Ok(None),
        }
    }
}
