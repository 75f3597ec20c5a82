// libs/appointment-cell/src/services/notification.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::directory::{Facility, Profile};
use shared_utils::time::format_clinic_time;
use sms_cell::{SmsSendResult, SmsService};

use crate::models::{Appointment, AppointmentError, AppointmentStatus, AttemptStatus, RescheduleRequester};
use crate::services::directory::DirectoryService;
use crate::services::repository::AppointmentRepository;

const SIGNATURE: &str = "MediReach";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationRecipient {
    Patient,
    Staff,
}

/// Outcome of one notification. Not sending because the recipient has no
/// phone or declined SMS is still a success.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    pub recipient: Option<NotificationRecipient>,
    pub sms: Option<SmsSendResult>,
    pub skipped: Option<String>,
    pub error: Option<String>,
}

impl NotificationResult {
    fn sent(recipient: NotificationRecipient, sms: SmsSendResult) -> Self {
        Self { success: true, recipient: Some(recipient), sms: Some(sms), skipped: None, error: None }
    }

    fn skipped(recipient: Option<NotificationRecipient>, reason: impl Into<String>) -> Self {
        Self { success: true, recipient, sms: None, skipped: Some(reason.into()), error: None }
    }

    fn failed(recipient: Option<NotificationRecipient>, error: impl Into<String>) -> Self {
        Self { success: false, recipient, sms: None, skipped: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    StatusChanged {
        appointment_id: Uuid,
        status: AppointmentStatus,
    },
    RescheduleRequested {
        appointment_id: Uuid,
        proposed_time: DateTime<Utc>,
        requested_by: RescheduleRequester,
    },
    RescheduleResponded {
        appointment_id: Uuid,
        outcome: AttemptStatus,
        responded_by: RescheduleRequester,
    },
}

struct MessageContext {
    appointment: Appointment,
    patient: Option<Profile>,
    staff: Option<Profile>,
    facility: Option<Facility>,
}

impl MessageContext {
    fn facility_name(&self) -> &str {
        self.facility.as_ref().map(|f| f.name.as_str()).unwrap_or("the clinic")
    }

    fn patient_name(&self) -> &str {
        display_name(self.patient.as_ref(), "Patient")
    }

    fn staff_name(&self) -> &str {
        display_name(self.staff.as_ref(), "Staff")
    }
}

fn display_name<'a>(profile: Option<&'a Profile>, fallback: &'a str) -> &'a str {
    profile
        .map(|p| p.name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
}

/// Sends SMS to the affected party when an appointment changes. Runs with the
/// service token since the acting user may not be allowed to read the other
/// party's profile.
#[derive(Clone)]
pub struct NotificationService {
    repository: AppointmentRepository,
    directory: DirectoryService,
    sms: SmsService,
    service_token: String,
    clinic_utc_offset_minutes: i32,
}

impl NotificationService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self::with_client(supabase, SmsService::new(config), config)
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, sms: SmsService, config: &AppConfig) -> Self {
        Self {
            repository: AppointmentRepository::new(Arc::clone(&supabase)),
            directory: DirectoryService::new(supabase),
            sms,
            service_token: config.supabase_service_role_key.clone(),
            clinic_utc_offset_minutes: config.clinic_utc_offset_minutes,
        }
    }

    pub fn with_sms(mut self, sms: SmsService) -> Self {
        self.sms = sms;
        self
    }

    /// Runs the notification in the background. The caller's operation has
    /// already committed, so the outcome is only logged.
    pub fn dispatch(&self, event: NotificationEvent) -> JoinHandle<NotificationResult> {
        let service = self.clone();
        tokio::spawn(async move {
            let result = service.notify(event.clone()).await;
            if result.success {
                debug!("Notification for {:?} finished: {:?}", event, result.skipped);
            } else {
                warn!("Notification for {:?} failed: {:?}", event, result.error);
            }
            result
        })
    }

    pub async fn notify(&self, event: NotificationEvent) -> NotificationResult {
        match event {
            NotificationEvent::StatusChanged { appointment_id, status } => {
                self.send_confirmation_notification(appointment_id, status).await
            }
            NotificationEvent::RescheduleRequested { appointment_id, proposed_time, requested_by } => {
                self.send_reschedule_request(appointment_id, proposed_time, requested_by).await
            }
            NotificationEvent::RescheduleResponded { appointment_id, outcome, responded_by } => {
                self.send_reschedule_response(appointment_id, outcome, responded_by).await
            }
        }
    }

    /// Tells the patient their appointment was confirmed, canceled or completed.
    pub async fn send_confirmation_notification(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> NotificationResult {
        let context = match self.load_context(appointment_id).await {
            Ok(context) => context,
            Err(e) => return NotificationResult::failed(Some(NotificationRecipient::Patient), e.to_string()),
        };

        let Some(message) = status_message(
            status,
            context.facility_name(),
            context.appointment.scheduled_at,
            context.appointment.cancellation_reason.as_deref(),
            self.clinic_utc_offset_minutes,
        ) else {
            return NotificationResult::skipped(
                Some(NotificationRecipient::Patient),
                format!("no message for status {}", status),
            );
        };

        self.send_to(NotificationRecipient::Patient, context.patient.as_ref(), &message).await
    }

    /// Tells the other side that a new time was proposed. Staff proposals go
    /// to the patient; patient requests go to the assigned staff member, or
    /// back to the patient when nobody is assigned yet.
    pub async fn send_reschedule_request(
        &self,
        appointment_id: Uuid,
        proposed_time: DateTime<Utc>,
        requested_by: RescheduleRequester,
    ) -> NotificationResult {
        let context = match self.load_context(appointment_id).await {
            Ok(context) => context,
            Err(e) => return NotificationResult::failed(None, e.to_string()),
        };

        let offset = self.clinic_utc_offset_minutes;
        let original_time = context
            .appointment
            .latest_pending_attempt()
            .map(|attempt| attempt.original_time)
            .unwrap_or(context.appointment.scheduled_at);
        let old = format_clinic_time(original_time, offset);
        let new = format_clinic_time(proposed_time, offset);

        match requested_by {
            RescheduleRequester::Staff => {
                let message = format!(
                    "RESCHEDULE REQUEST: {} at {} has proposed to reschedule your appointment from {} to {}. Please log in to approve or reject.",
                    context.staff_name(),
                    context.facility_name(),
                    old,
                    new
                );
                self.send_to(NotificationRecipient::Patient, context.patient.as_ref(), &message).await
            }
            RescheduleRequester::Patient => {
                let message = format!(
                    "RESCHEDULE REQUEST: {} has requested to reschedule their appointment from {} to {}. Please review and respond.",
                    context.patient_name(),
                    old,
                    new
                );
                match context.staff.as_ref() {
                    Some(staff) => self.send_to(NotificationRecipient::Staff, Some(staff), &message).await,
                    None => {
                        self.send_to(NotificationRecipient::Patient, context.patient.as_ref(), &message)
                            .await
                    }
                }
            }
        }
    }

    /// Tells the proposer how the other side answered.
    pub async fn send_reschedule_response(
        &self,
        appointment_id: Uuid,
        outcome: AttemptStatus,
        responded_by: RescheduleRequester,
    ) -> NotificationResult {
        let context = match self.load_context(appointment_id).await {
            Ok(context) => context,
            Err(e) => return NotificationResult::failed(None, e.to_string()),
        };

        let time = format_clinic_time(context.appointment.scheduled_at, self.clinic_utc_offset_minutes);
        let approved = match outcome {
            AttemptStatus::Approved => true,
            AttemptStatus::Rejected => false,
            AttemptStatus::Pending => {
                return NotificationResult::skipped(None, "reschedule attempt is still pending");
            }
        };

        match responded_by {
            RescheduleRequester::Staff => {
                let message = if approved {
                    format!(
                        "RESCHEDULE APPROVED: Your reschedule request for {} has been approved. New time: {}",
                        context.facility_name(),
                        time
                    )
                } else {
                    format!(
                        "RESCHEDULE REJECTED: Your reschedule request for {} has been rejected. Original time remains: {}",
                        context.facility_name(),
                        time
                    )
                };
                self.send_to(NotificationRecipient::Patient, context.patient.as_ref(), &message).await
            }
            RescheduleRequester::Patient => {
                let message = if approved {
                    format!(
                        "RESCHEDULE APPROVED: {} has approved the reschedule. New time: {}",
                        context.patient_name(),
                        time
                    )
                } else {
                    format!(
                        "RESCHEDULE REJECTED: {} has rejected the reschedule proposal. Original time remains: {}",
                        context.patient_name(),
                        time
                    )
                };
                match context.staff.as_ref() {
                    Some(staff) => self.send_to(NotificationRecipient::Staff, Some(staff), &message).await,
                    None => NotificationResult::skipped(
                        Some(NotificationRecipient::Staff),
                        "no staff member assigned",
                    ),
                }
            }
        }
    }

    async fn load_context(&self, appointment_id: Uuid) -> Result<MessageContext, AppointmentError> {
        let token = self.service_token.as_str();
        let appointment = self.repository.get_required(appointment_id, token).await?;

        let staff_id = appointment.responsible_staff_id();
        let staff_lookup = async move {
            match staff_id {
                Some(staff_id) => self.directory.get_profile(staff_id, token).await,
                None => Ok(None),
            }
        };

        let (patient, staff, facility) = tokio::try_join!(
            self.directory.get_profile(appointment.patient_id, token),
            staff_lookup,
            self.directory.get_facility(appointment.facility_id, token),
        )?;

        Ok(MessageContext { appointment, patient, staff, facility })
    }

    async fn send_to(
        &self,
        recipient: NotificationRecipient,
        profile: Option<&Profile>,
        message: &str,
    ) -> NotificationResult {
        let Some(phone) = profile.and_then(Profile::sms_destination) else {
            return NotificationResult::skipped(
                Some(recipient),
                "recipient has no phone or has not consented to SMS",
            );
        };

        match self.sms.send_sms(phone, message).await {
            Ok(sms) => {
                info!("Notified {:?} at {} via {}", recipient, phone, sms.provider);
                NotificationResult::sent(recipient, sms)
            }
            Err(e) => NotificationResult::failed(Some(recipient), e.to_string()),
        }
    }
}

/// Patient-facing text for a status change, if that status has one.
pub fn status_message(
    status: AppointmentStatus,
    facility_name: &str,
    scheduled_at: DateTime<Utc>,
    cancellation_reason: Option<&str>,
    clinic_utc_offset_minutes: i32,
) -> Option<String> {
    match status {
        AppointmentStatus::Confirmed => Some(format!(
            "Appointment confirmed at {}. See you soon! - {}",
            facility_name, SIGNATURE
        )),
        AppointmentStatus::Canceled => {
            let when = format_clinic_time(scheduled_at, clinic_utc_offset_minutes);
            Some(match cancellation_reason.map(str::trim).filter(|r| !r.is_empty()) {
                Some(reason) => format!("Appointment cancelled: {}. Reason: {}", when, reason),
                None => format!("Appointment cancelled: {}", when),
            })
        }
        AppointmentStatus::Completed => Some(format!(
            "Thank you for visiting {}! - {}",
            facility_name, SIGNATURE
        )),
        _ => None,
    }
}
