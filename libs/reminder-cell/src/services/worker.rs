use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::{Notify, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::time::format_clinic_time;
use sms_cell::{SmsError, SmsSendResult, SmsService};

use crate::error::ReminderError;
use crate::models::{DeliveryOutcome, PollSummary, Reminder, WorkerConfig};
use crate::services::store::ReminderStore;

/// Polls for due reminders and delivers them. Any number of instances may run
/// against the same store: a reminder is only sent by the instance that wins
/// its `scheduled -> sending` claim.
pub struct ReminderDeliveryWorker {
    worker_id: String,
    config: WorkerConfig,
    store: ReminderStore,
    sms: SmsService,
    service_token: String,
    is_shutdown: RwLock<bool>,
    wake: Notify,
}

impl ReminderDeliveryWorker {
    pub fn new(config: WorkerConfig, app_config: &AppConfig) -> Self {
        let store = ReminderStore::new(Arc::new(SupabaseClient::new(app_config)));

        Self {
            worker_id: config.worker_id.clone(),
            config,
            store,
            sms: SmsService::new(app_config),
            service_token: app_config.supabase_service_role_key.clone(),
            is_shutdown: RwLock::new(false),
            wake: Notify::new(),
        }
    }

    pub fn with_sms(mut self, sms: SmsService) -> Self {
        self.sms = sms;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn start(&self) -> Result<(), ReminderError> {
        info!(
            "Starting reminder worker {} (provider: {}, every {}s, batch {})",
            self.worker_id,
            self.sms.provider(),
            self.config.poll_interval_seconds,
            self.config.batch_size
        );

        let interval = Duration::from_secs(self.config.poll_interval_seconds);

        loop {
            if *self.is_shutdown.read().await {
                break;
            }

            match self.poll_once().await {
                Ok(summary) if summary.due > 0 || summary.reclaimed > 0 => info!("Reminder poll finished: {:?}", summary),
                Ok(_) => debug!("No reminders due"),
                Err(e) => error!("Reminder poll failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!("Reminder worker {} stopped", self.worker_id);
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Initiating shutdown for reminder worker {}", self.worker_id);
        *self.is_shutdown.write().await = true;
        self.wake.notify_one();
    }

    /// One poll cycle. Per-reminder failures are recorded on the reminder and
    /// never abort the batch; only the initial fetch can fail the cycle.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll_once(&self) -> Result<PollSummary, ReminderError> {
        let reclaimed = self.reclaim_stale_claims().await;

        let due = self
            .store
            .fetch_due(Utc::now(), self.config.batch_size, &self.service_token)
            .await?;

        let mut summary = PollSummary {
            due: due.len(),
            reclaimed,
            ..PollSummary::default()
        };

        for reminder in due {
            if *self.is_shutdown.read().await {
                debug!("Shutdown requested; leaving remaining reminders for the next worker");
                break;
            }

            let claimed = match self.store.claim(reminder.id, &self.service_token).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    debug!("Reminder {} already claimed elsewhere", reminder.id);
                    summary.lost_claims += 1;
                    continue;
                }
                Err(e) => {
                    error!("Failed to claim reminder {}: {}", reminder.id, e);
                    continue;
                }
            };

            summary.claimed += 1;

            match self.deliver(claimed).await {
                DeliveryOutcome::Sent { .. } => summary.sent += 1,
                DeliveryOutcome::Failed { .. } => summary.failed += 1,
                DeliveryOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }

        Ok(summary)
    }

    async fn reclaim_stale_claims(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.stale_claim_seconds as i64);

        match self.store.reclaim_stale(cutoff, &self.service_token).await {
            Ok(reclaimed) => {
                for reminder in &reclaimed {
                    warn!("Reminder {} was stuck in sending; marked failed", reminder.id);
                }
                reclaimed.len()
            }
            Err(e) => {
                error!("Failed to reclaim stale reminder claims: {}", e);
                0
            }
        }
    }

    #[instrument(skip(self, reminder), fields(reminder_id = %reminder.id, offset = %reminder.offset))]
    async fn deliver(&self, reminder: Reminder) -> DeliveryOutcome {
        let message = match self.compose_message(&reminder).await {
            Ok(message) => message,
            Err(reason) => {
                info!("Skipping reminder {}: {}", reminder.id, reason);
                if let Err(e) = self
                    .store
                    .mark_failed(reminder.id, json!({ "skipped": reason }), &self.service_token)
                    .await
                {
                    error!("Failed to record skipped reminder {}: {}", reminder.id, e);
                }
                return DeliveryOutcome::Skipped { reason };
            }
        };

        let (result, attempts) = self.send_with_retry(&reminder.patient_phone, &message).await;

        match result {
            Ok(sent) => {
                let response = serde_json::to_value(&sent).unwrap_or_else(|_| json!({ "provider": sent.provider }));
                if let Err(e) = self
                    .store
                    .mark_sent(reminder.id, sent.message_id.as_deref(), response, &self.service_token)
                    .await
                {
                    error!("Reminder {} sent but its status could not be recorded: {}", reminder.id, e);
                }

                info!("Reminder {} sent after {} attempt(s)", reminder.id, attempts);
                DeliveryOutcome::Sent { message_id: sent.message_id }
            }
            Err(e) => {
                let error = e.to_string();
                if let Err(store_err) = self
                    .store
                    .mark_failed(
                        reminder.id,
                        json!({ "error": error, "attempts": attempts, "provider": self.sms.provider() }),
                        &self.service_token,
                    )
                    .await
                {
                    error!("Failed to record failure for reminder {}: {}", reminder.id, store_err);
                }

                warn!("Reminder {} failed after {} attempt(s): {}", reminder.id, attempts, error);
                DeliveryOutcome::Failed { error }
            }
        }
    }

    /// Builds the SMS body, or returns why the reminder should not be sent.
    async fn compose_message(&self, reminder: &Reminder) -> Result<String, String> {
        // Derived time is used when the appointment row cannot be read.
        let mut appointment_time = reminder.scheduled_send_at + ChronoDuration::hours(reminder.offset.hours());
        let mut facility_id = None;

        match self
            .store
            .get_appointment_snapshot(reminder.appointment_id, &self.service_token)
            .await
        {
            Ok(Some(appointment)) => {
                if appointment.is_closed() {
                    return Err(format!("appointment is {}", appointment.status));
                }
                if appointment.scheduled_at <= Utc::now() {
                    return Err("appointment time has passed".to_string());
                }
                appointment_time = appointment.scheduled_at;
                facility_id = appointment.facility_id;
            }
            Ok(None) => return Err("appointment not found".to_string()),
            Err(e) => warn!(
                "Could not re-validate appointment {} for reminder {}: {}",
                reminder.appointment_id, reminder.id, e
            ),
        }

        let facility = match facility_id {
            Some(id) => self
                .store
                .facility_name(id, &self.service_token)
                .await
                .unwrap_or_else(|e| {
                    warn!("Facility lookup failed for {}: {}", id, e);
                    None
                }),
            None => None,
        }
        .unwrap_or_else(|| "the clinic".to_string());

        Ok(format!(
            "Reminder: Hello, you have an appointment at {} on {}.",
            facility,
            format_clinic_time(appointment_time, self.config.clinic_utc_offset_minutes)
        ))
    }

    /// First attempt plus up to `max_retries` more, waiting
    /// `retry_backoff_ms * attempt` between them.
    async fn send_with_retry(&self, to: &str, message: &str) -> (Result<SmsSendResult, SmsError>, u32) {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 1;

        loop {
            match self.sms.send_sms(to, message).await {
                Ok(result) => return (Ok(result), attempt),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    warn!("Send attempt {}/{} failed: {}", attempt, max_attempts, e);
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(attempt),
                    ))
                    .await;
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}
