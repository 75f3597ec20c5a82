use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{return_representation, upsert_representation, SupabaseClient};

use crate::error::ReminderError;
use crate::models::{AppointmentSnapshot, Reminder, ReminderStatus};

/// PostgREST access to the `reminders` table. Every state change is a
/// conditional PATCH so concurrent workers and callbacks cannot clobber
/// each other.
#[derive(Clone)]
pub struct ReminderStore {
    supabase: Arc<SupabaseClient>,
}

impl ReminderStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Inserts or re-arms rows keyed on `(appointment_id, offset)`.
    pub async fn upsert(&self, rows: Vec<Value>, auth_token: &str) -> Result<Vec<Reminder>, ReminderError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let reminders: Vec<Reminder> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/reminders?on_conflict=appointment_id,offset",
                Some(auth_token),
                Some(Value::Array(rows)),
                Some(upsert_representation()),
            )
            .await?;

        Ok(reminders)
    }

    pub async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        auth_token: &str,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let path = format!(
            "/rest/v1/reminders?status=eq.scheduled&scheduled_send_at=lte.{}&order=scheduled_send_at.asc&limit={}",
            urlencoding::encode(&now.to_rfc3339()),
            limit
        );

        let reminders: Vec<Reminder> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(reminders)
    }

    /// Moves a row from `scheduled` to `sending`. `None` means another worker
    /// (or a reschedule) got there first.
    pub async fn claim(&self, reminder_id: Uuid, auth_token: &str) -> Result<Option<Reminder>, ReminderError> {
        let path = format!("/rest/v1/reminders?id=eq.{}&status=eq.scheduled", reminder_id);
        let body = json!({
            "status": ReminderStatus::Sending,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let claimed: Vec<Reminder> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(return_representation()))
            .await?;

        Ok(claimed.into_iter().next())
    }

    pub async fn mark_sent(
        &self,
        reminder_id: Uuid,
        provider_message_id: Option<&str>,
        provider_response: Value,
        auth_token: &str,
    ) -> Result<(), ReminderError> {
        let now = Utc::now().to_rfc3339();
        let body = json!({
            "status": ReminderStatus::Sent,
            "sent_at": now,
            "provider_message_id": provider_message_id,
            "provider_response": provider_response,
            "updated_at": now,
        });

        self.patch_claimed(reminder_id, body, auth_token).await
    }

    pub async fn mark_failed(
        &self,
        reminder_id: Uuid,
        provider_response: Value,
        auth_token: &str,
    ) -> Result<(), ReminderError> {
        let body = json!({
            "status": ReminderStatus::Failed,
            "provider_response": provider_response,
            "updated_at": Utc::now().to_rfc3339(),
        });

        self.patch_claimed(reminder_id, body, auth_token).await
    }

    /// Gives up on rows whose claim is older than `cutoff`. The send may or
    /// may not have happened, so they are failed rather than re-armed.
    pub async fn reclaim_stale(&self, cutoff: DateTime<Utc>, auth_token: &str) -> Result<Vec<Reminder>, ReminderError> {
        let path = format!(
            "/rest/v1/reminders?status=eq.sending&updated_at=lt.{}",
            urlencoding::encode(&cutoff.to_rfc3339())
        );
        let body = json!({
            "status": ReminderStatus::Failed,
            "provider_response": {
                "error": "delivery outcome unknown; claim expired",
                "claim_expired_before": cutoff.to_rfc3339(),
            },
            "updated_at": Utc::now().to_rfc3339(),
        });

        let reclaimed: Vec<Reminder> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(return_representation()))
            .await?;

        Ok(reclaimed)
    }

    // Final writes only land while the row is still ours; a reschedule that
    // re-armed it in the meantime wins.
    async fn patch_claimed(&self, reminder_id: Uuid, body: Value, auth_token: &str) -> Result<(), ReminderError> {
        let path = format!("/rest/v1/reminders?id=eq.{}&status=eq.sending", reminder_id);
        let updated: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(return_representation()))
            .await?;

        if updated.is_empty() {
            debug!("Reminder {} left the sending state before its result was recorded", reminder_id);
        }

        Ok(())
    }

    /// Receipts never touch a row the worker has not dispatched yet.
    pub async fn apply_receipt(
        &self,
        reminder_id: Uuid,
        body: Value,
        auth_token: &str,
    ) -> Result<Option<Reminder>, ReminderError> {
        let path = format!("/rest/v1/reminders?id=eq.{}&status=neq.scheduled", reminder_id);
        let updated: Vec<Reminder> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(return_representation()))
            .await?;

        Ok(updated.into_iter().next())
    }

    pub async fn find_by_provider_message_id(
        &self,
        message_id: &str,
        auth_token: &str,
    ) -> Result<Option<Reminder>, ReminderError> {
        let path = format!(
            "/rest/v1/reminders?provider_message_id=eq.{}&limit=1",
            urlencoding::encode(message_id)
        );

        let rows: Vec<Reminder> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(rows.into_iter().next())
    }

    /// Most recently dispatched reminder addressed to `phone`; fallback
    /// correlation for receipts whose message id is not on file.
    pub async fn find_latest_dispatched_for_phone(
        &self,
        phone: &str,
        auth_token: &str,
    ) -> Result<Option<Reminder>, ReminderError> {
        let path = format!(
            "/rest/v1/reminders?patient_phone=eq.{}&status=in.(sending,sent,failed)&order=sent_at.desc.nullslast,updated_at.desc&limit=1",
            urlencoding::encode(phone)
        );

        let rows: Vec<Reminder> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn list(
        &self,
        status: Option<ReminderStatus>,
        phone: Option<&str>,
        facility_id: Option<Uuid>,
        limit: u32,
        auth_token: &str,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let mut query_parts = Vec::new();

        if let Some(facility_id) = facility_id {
            query_parts.push("select=*,appointments!inner(facility_id)".to_string());
            query_parts.push(format!("appointments.facility_id=eq.{}", facility_id));
        }
        if let Some(status) = status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(phone) = phone {
            query_parts.push(format!("patient_phone=eq.{}", urlencoding::encode(phone)));
        }
        query_parts.push("order=scheduled_send_at.desc".to_string());
        query_parts.push(format!("limit={}", limit));

        let path = format!("/rest/v1/reminders?{}", query_parts.join("&"));
        let rows: Vec<Reminder> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;

        Ok(rows)
    }

    pub async fn get_appointment_snapshot(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<AppointmentSnapshot>, ReminderError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&select=id,facility_id,scheduled_at,status&limit=1",
            appointment_id
        );

        let rows: Vec<AppointmentSnapshot> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn facility_name(&self, facility_id: Uuid, auth_token: &str) -> Result<Option<String>, ReminderError> {
        Ok(self
            .supabase
            .get_facility(facility_id, auth_token)
            .await?
            .map(|facility| facility.name))
    }
}
