// libs/appointment-cell/src/services/booking.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;
use shared_models::directory::{Facility, Profile};
use shared_utils::time::{format_clinic_time, local_day_bounds, local_hour};
use reminder_cell::{Reminder, ReminderSchedulerService, ReminderStore};
use sms_cell::{SmsSendResult, SmsService};

use crate::models::{
    Actor, Appointment, AppointmentError, AppointmentStatus, AttemptStatus, CreateAppointmentRequest,
    FacilitySummary, PatientSummary, RescheduleAction, RescheduleAttempt, RescheduleRequest,
    StaffAppointmentSummary, StaffDashboardQuery, TimeBlock, UpdateAppointmentStatusRequest,
};
use crate::services::availability::AvailabilityService;
use crate::services::directory::DirectoryService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::{NotificationEvent, NotificationService};
use crate::services::repository::{AppointmentRangeFilter, AppointmentRepository};

/// Result of sending an on-demand test SMS for an appointment.
#[derive(Debug, Clone, Serialize)]
pub struct TestSmsOutcome {
    pub sms: SmsSendResult,
    pub reminder: Option<Reminder>,
}

/// Orchestrates the appointment operations: validation, availability,
/// state transitions, persistence, reminders and notifications.
pub struct AppointmentBookingService {
    repository: AppointmentRepository,
    directory: DirectoryService,
    availability: AvailabilityService,
    lifecycle: AppointmentLifecycleService,
    reminders: ReminderSchedulerService,
    notifications: NotificationService,
    sms: SmsService,
    service_token: String,
    clinic_utc_offset_minutes: i32,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let sms = SmsService::new(config);

        Self {
            repository: AppointmentRepository::new(Arc::clone(&supabase)),
            directory: DirectoryService::new(Arc::clone(&supabase)),
            availability: AvailabilityService::new(Arc::clone(&supabase)),
            lifecycle: AppointmentLifecycleService::new(),
            reminders: ReminderSchedulerService::with_store(ReminderStore::new(Arc::clone(&supabase))),
            notifications: NotificationService::with_client(supabase, sms.clone(), config),
            sms,
            service_token: config.supabase_service_role_key.clone(),
            clinic_utc_offset_minutes: config.clinic_utc_offset_minutes,
        }
    }

    /// Swaps the SMS backend used for notifications and test messages.
    pub fn with_sms(mut self, sms: SmsService) -> Self {
        self.notifications = self.notifications.with_sms(sms.clone());
        self.sms = sms;
        self
    }

    // ==============================================================================
    // CREATION
    // ==============================================================================

    pub async fn create_appointment(
        &self,
        user: &User,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let patient_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppointmentError::ValidationError("Invalid user id".to_string()))?;

        let service = request.service.trim();
        if service.is_empty() {
            return Err(AppointmentError::ValidationError("service is required".to_string()));
        }
        if request.scheduled_at <= Utc::now() {
            return Err(AppointmentError::ValidationError("scheduledAt must be in the future".to_string()));
        }

        if self.directory.get_facility(request.facility_id, auth_token).await?.is_none() {
            return Err(AppointmentError::FacilityNotFound);
        }

        self.availability
            .ensure_available(request.facility_id, request.scheduled_at, None, auth_token)
            .await?;

        let now = Utc::now().to_rfc3339();
        let row = json!({
            "patient_id": patient_id,
            "facility_id": request.facility_id,
            "staff_id": null,
            "service": service,
            "scheduled_at": request.scheduled_at.to_rfc3339(),
            "status": AppointmentStatus::Pending,
            "notes": request.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            "cancellation_reason": null,
            "reschedule_history": [],
            "version": 1,
            "created_at": now,
            "updated_at": now,
        });

        let appointment = self.repository.insert(row, auth_token).await?;
        info!(
            "Appointment {} booked for patient {} at {}",
            appointment.id, appointment.patient_id, appointment.scheduled_at
        );

        self.arm_reminders(&appointment).await;

        Ok(appointment)
    }

    // ==============================================================================
    // STATUS TRANSITIONS
    // ==============================================================================

    pub async fn confirm_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let staff_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppointmentError::ValidationError("Invalid staff id".to_string()))?;

        let mut appointment = self.repository.get_required(appointment_id, auth_token).await?;
        self.lifecycle.confirm(&mut appointment, staff_id)?;

        let saved = self.repository.save(&appointment, auth_token).await?;
        self.notify_status(&saved);
        Ok(saved)
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        reason: Option<String>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.update_status(
            appointment_id,
            user,
            UpdateAppointmentStatusRequest { status: AppointmentStatus::Canceled, cancellation_reason: reason },
            auth_token,
        )
        .await
    }

    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.update_status(
            appointment_id,
            user,
            UpdateAppointmentStatusRequest { status: AppointmentStatus::Completed, cancellation_reason: None },
            auth_token,
        )
        .await
    }

    /// Generic status change; routed through the dedicated transitions so the
    /// same rules apply whichever endpoint is used.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        user: &User,
        request: UpdateAppointmentStatusRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let actor = actor_for(user);
        let mut appointment = self.repository.get_required(appointment_id, auth_token).await?;

        self.lifecycle
            .apply_status_update(&mut appointment, &actor, request.status, request.cancellation_reason)?;

        let saved = self.repository.save(&appointment, auth_token).await?;
        self.notify_status(&saved);
        Ok(saved)
    }

    // ==============================================================================
    // RESCHEDULE NEGOTIATION
    // ==============================================================================

    pub async fn propose_reschedule_as_staff(
        &self,
        appointment_id: Uuid,
        user: &User,
        request: RescheduleRequest,
        auth_token: &str,
    ) -> Result<(Appointment, RescheduleAttempt), AppointmentError> {
        if !user.is_staff() {
            return Err(AppointmentError::Forbidden("Only staff can propose a new time".to_string()));
        }
        self.propose(appointment_id, Actor::staff(user.id.clone()), request, auth_token).await
    }

    pub async fn request_reschedule_as_patient(
        &self,
        appointment_id: Uuid,
        user: &User,
        request: RescheduleRequest,
        auth_token: &str,
    ) -> Result<(Appointment, RescheduleAttempt), AppointmentError> {
        self.propose(appointment_id, Actor::patient(user.id.clone()), request, auth_token).await
    }

    async fn propose(
        &self,
        appointment_id: Uuid,
        actor: Actor,
        request: RescheduleRequest,
        auth_token: &str,
    ) -> Result<(Appointment, RescheduleAttempt), AppointmentError> {
        let mut appointment = self.repository.get_required(appointment_id, auth_token).await?;

        let attempt = self.lifecycle.propose_reschedule(
            &mut appointment,
            &actor,
            request.new_time,
            request.reason,
            Utc::now(),
        )?;

        self.availability
            .ensure_available(appointment.facility_id, attempt.proposed_time, Some(appointment.id), auth_token)
            .await?;

        let saved = self.repository.save(&appointment, auth_token).await?;

        self.notifications.dispatch(NotificationEvent::RescheduleRequested {
            appointment_id: saved.id,
            proposed_time: attempt.proposed_time,
            requested_by: attempt.requested_by,
        });

        Ok((saved, attempt))
    }

    pub async fn respond_to_reschedule(
        &self,
        appointment_id: Uuid,
        user: &User,
        action: RescheduleAction,
        auth_token: &str,
    ) -> Result<(Appointment, RescheduleAttempt), AppointmentError> {
        let actor = actor_for(user);
        let mut appointment = self.repository.get_required(appointment_id, auth_token).await?;

        let attempt = self
            .lifecycle
            .respond_to_reschedule(&mut appointment, &actor, action, Utc::now())?;

        if attempt.status == AttemptStatus::Approved {
            // The slot may have been taken while the proposal was open.
            self.availability
                .ensure_available(appointment.facility_id, appointment.scheduled_at, Some(appointment.id), auth_token)
                .await?;
        }

        let saved = self.repository.save(&appointment, auth_token).await?;

        if attempt.status == AttemptStatus::Approved {
            self.arm_reminders(&saved).await;
        }

        self.notifications.dispatch(NotificationEvent::RescheduleResponded {
            appointment_id: saved.id,
            outcome: attempt.status,
            responded_by: actor.side(),
        });

        Ok((saved, attempt))
    }

    /// Attempts oldest first. Visible to the owning patient and to staff.
    pub async fn get_reschedule_history(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Vec<RescheduleAttempt>, AppointmentError> {
        let appointment = self.get_appointment(appointment_id, user, auth_token).await?;

        let mut history = appointment.reschedule_history;
        history.sort_by_key(|attempt| attempt.created_at);
        Ok(history)
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.repository.get_required(appointment_id, auth_token).await?;

        if !user.is_staff() && !appointment.is_owned_by(&user.id) {
            return Err(AppointmentError::Forbidden("You can only view your own appointments".to_string()));
        }

        Ok(appointment)
    }

    pub async fn list_own_appointments(&self, user: &User, auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        self.repository.list_for_patient(&user.id, auth_token).await
    }

    pub async fn list_all_appointments(&self, auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        self.repository.list_all(auth_token).await
    }

    /// Staff members are limited to the facility on their profile; admins are not.
    pub async fn list_facility_appointments(
        &self,
        facility_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if !user.is_admin() {
            let staff_id = Uuid::parse_str(&user.id)
                .map_err(|_| AppointmentError::ValidationError("Invalid user id".to_string()))?;
            let profile = self.directory.get_profile(staff_id, auth_token).await?;

            if profile.and_then(|p| p.facility_id) != Some(facility_id) {
                return Err(AppointmentError::Forbidden(
                    "You can only view appointments at your own facility".to_string(),
                ));
            }
        }

        self.repository.list_for_facility(facility_id, auth_token).await
    }

    /// Day view for staff. Defaults to today in clinic time; `"all"` disables
    /// the status and specialist filters.
    pub async fn staff_dashboard(
        &self,
        query: StaffDashboardQuery,
        auth_token: &str,
    ) -> Result<Vec<StaffAppointmentSummary>, AppointmentError> {
        let offset = self.clinic_utc_offset_minutes;
        let (start, end) = dashboard_window(&query, Utc::now(), offset)?;

        let filter = AppointmentRangeFilter {
            status: active_filter(query.status.as_deref())
                .map(str::parse::<AppointmentStatus>)
                .transpose()?,
            service: active_filter(query.specialist.as_deref()).map(str::to_string),
        };
        let time_block = active_filter(query.time_block.as_deref())
            .map(str::parse::<TimeBlock>)
            .transpose()?;

        let appointments: Vec<Appointment> = self
            .repository
            .list_in_range(start, end, &filter, auth_token)
            .await?
            .into_iter()
            .filter(|a| time_block.map_or(true, |block| block.contains_hour(local_hour(a.scheduled_at, offset))))
            .collect();

        let patient_ids: Vec<Uuid> = appointments.iter().map(|a| a.patient_id).collect::<BTreeSet<_>>().into_iter().collect();
        let facility_ids: Vec<Uuid> = appointments.iter().map(|a| a.facility_id).collect::<BTreeSet<_>>().into_iter().collect();

        let (patients, facilities) = futures::try_join!(
            self.directory.profiles_by_ids(&patient_ids, auth_token),
            self.directory.facilities_by_ids(&facility_ids, auth_token),
        )?;

        debug!(
            "Staff dashboard {}..{} returned {} appointment(s)",
            start,
            end,
            appointments.len()
        );

        Ok(appointments
            .into_iter()
            .map(|a| summarize(a, &patients, &facilities))
            .collect())
    }

    // ==============================================================================
    // TEST SMS
    // ==============================================================================

    /// Sends a one-off reminder to the patient regardless of their SMS
    /// preference and records it against the appointment.
    pub async fn send_test_sms(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<TestSmsOutcome, AppointmentError> {
        let appointment = self.repository.get_required(appointment_id, auth_token).await?;

        let (patient, facility) = futures::try_join!(
            self.directory.get_profile(appointment.patient_id, self.service_token.as_str()),
            self.directory.get_facility(appointment.facility_id, auth_token),
        )?;

        let phone = patient
            .as_ref()
            .and_then(|p| p.phone.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppointmentError::ValidationError("Patient has no phone number on file".to_string()))?
            .to_string();

        let message = test_sms_message(patient.as_ref(), facility.as_ref(), appointment.scheduled_at, self.clinic_utc_offset_minutes);
        let sms = self.sms.send_sms(&phone, &message).await?;

        let reminder = match self
            .reminders
            .record_adhoc_send(appointment.id, &phone, &sms, &self.service_token)
            .await
        {
            Ok(reminder) => reminder,
            Err(e) => {
                warn!("Test SMS for appointment {} sent but not recorded: {}", appointment.id, e);
                None
            }
        };

        Ok(TestSmsOutcome { sms, reminder })
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    /// (Re)arms the three reminders if the patient opted into SMS. The
    /// appointment is already committed, so failures are logged only.
    async fn arm_reminders(&self, appointment: &Appointment) {
        let profile = match self
            .directory
            .get_profile(appointment.patient_id, &self.service_token)
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                error!("Could not load patient for reminders on {}: {}", appointment.id, e);
                return;
            }
        };

        let Some(phone) = profile.as_ref().and_then(Profile::sms_destination) else {
            debug!("Patient {} has not opted into SMS reminders", appointment.patient_id);
            return;
        };

        if let Err(e) = self
            .reminders
            .schedule_reminders(appointment.id, phone, appointment.scheduled_at, &self.service_token)
            .await
        {
            error!("Failed to schedule reminders for appointment {}: {}", appointment.id, e);
        }
    }

    fn notify_status(&self, appointment: &Appointment) {
        if matches!(
            appointment.status,
            AppointmentStatus::Confirmed | AppointmentStatus::Canceled | AppointmentStatus::Completed
        ) {
            self.notifications.dispatch(NotificationEvent::StatusChanged {
                appointment_id: appointment.id,
                status: appointment.status,
            });
        }
    }
}

fn actor_for(user: &User) -> Actor {
    if user.is_staff() {
        Actor::staff(user.id.clone())
    } else {
        Actor::patient(user.id.clone())
    }
}

fn active_filter(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

/// Inclusive `[start, end]` for the dashboard. Both bounds must be given to
/// override the default of the current clinic day.
fn dashboard_window(
    query: &StaffDashboardQuery,
    now: DateTime<Utc>,
    offset_minutes: i32,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppointmentError> {
    match (query.start_date.as_deref(), query.end_date.as_deref()) {
        (Some(start), Some(end)) => {
            let start = parse_bound(start, false, offset_minutes)?;
            let end = parse_bound(end, true, offset_minutes)?;
            if end < start {
                return Err(AppointmentError::ValidationError("endDate must not be before startDate".to_string()));
            }
            Ok((start, end))
        }
        _ => {
            let (start, next_day) = local_day_bounds(now, offset_minutes);
            Ok((start, next_day - Duration::milliseconds(1)))
        }
    }
}

/// Accepts an RFC 3339 instant or a plain `YYYY-MM-DD` clinic date; a plain
/// end date covers the whole day.
fn parse_bound(raw: &str, is_end: bool, offset_minutes: i32) -> Result<DateTime<Utc>, AppointmentError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppointmentError::ValidationError(format!("Invalid date: {}", raw)))?;
    let noon = date
        .and_hms_opt(12, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| AppointmentError::ValidationError(format!("Invalid date: {}", raw)))?;
    let (start, next_day) = local_day_bounds(noon - Duration::minutes(i64::from(offset_minutes)), offset_minutes);

    Ok(if is_end { next_day - Duration::milliseconds(1) } else { start })
}

fn summarize(
    appointment: Appointment,
    patients: &HashMap<Uuid, Profile>,
    facilities: &HashMap<Uuid, Facility>,
) -> StaffAppointmentSummary {
    let patient = patients.get(&appointment.patient_id);
    let facility = facilities.get(&appointment.facility_id);
    let specialist = match appointment.service.trim() {
        "" => "General".to_string(),
        service => service.to_string(),
    };

    StaffAppointmentSummary {
        id: appointment.id,
        date: appointment.scheduled_at,
        patient: PatientSummary {
            id: appointment.patient_id,
            name: patient
                .map(|p| p.name.trim())
                .filter(|n| !n.is_empty())
                .unwrap_or("Unknown")
                .to_string(),
            phone: patient
                .and_then(|p| p.phone.as_deref())
                .filter(|p| !p.trim().is_empty())
                .unwrap_or("N/A")
                .to_string(),
        },
        facility: FacilitySummary {
            id: appointment.facility_id,
            name: facility.map(|f| f.name.clone()).unwrap_or_else(|| "Unknown".to_string()),
            address: facility.and_then(|f| f.address.clone()),
        },
        specialist,
        status: appointment.status,
        notes: appointment.notes,
        created_at: appointment.created_at,
        updated_at: appointment.updated_at,
    }
}

fn test_sms_message(
    patient: Option<&Profile>,
    facility: Option<&Facility>,
    scheduled_at: DateTime<Utc>,
    offset_minutes: i32,
) -> String {
    let name = patient
        .map(|p| p.name.trim())
        .filter(|n| !n.is_empty())
        .unwrap_or("there");
    let facility_name = facility.map(|f| f.name.as_str()).unwrap_or("the clinic");

    format!(
        "Test SMS: Hello {}, this is a test reminder for your appointment at {} on {}.",
        name,
        facility_name,
        format_clinic_time(scheduled_at, offset_minutes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_defaults_to_the_clinic_day() {
        let now = Utc.with_ymd_and_hms(2030, 5, 10, 22, 0, 0).unwrap();
        let (start, end) = dashboard_window(&StaffDashboardQuery::default(), now, 180).unwrap();

        assert_eq!(start, Utc.with_ymd_and_hms(2030, 5, 10, 21, 0, 0).unwrap());
        assert!(end < Utc.with_ymd_and_hms(2030, 5, 11, 21, 0, 0).unwrap());
        assert!(end > Utc.with_ymd_and_hms(2030, 5, 11, 20, 59, 59).unwrap());
    }

    #[test]
    fn plain_dates_cover_whole_local_days() {
        let query = StaffDashboardQuery {
            start_date: Some("2030-05-10".to_string()),
            end_date: Some("2030-05-11".to_string()),
            ..Default::default()
        };
        let now = Utc::now();
        let (start, end) = dashboard_window(&query, now, 0).unwrap();

        assert_eq!(start, Utc.with_ymd_and_hms(2030, 5, 10, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2030, 5, 12, 0, 0, 0).unwrap() - Duration::milliseconds(1));
    }

    #[test]
    fn only_one_bound_falls_back_to_today() {
        let query = StaffDashboardQuery {
            start_date: Some("2030-05-10".to_string()),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2031, 1, 1, 8, 0, 0).unwrap();
        let (start, _) = dashboard_window(&query, now, 0).unwrap();

        assert_eq!(start, Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let query = StaffDashboardQuery {
            start_date: Some("2030-05-11".to_string()),
            end_date: Some("2030-05-10".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            dashboard_window(&query, Utc::now(), 0),
            Err(AppointmentError::ValidationError(_))
        ));
    }

    #[test]
    fn all_disables_a_filter() {
        assert_eq!(active_filter(Some("all")), None);
        assert_eq!(active_filter(Some("ALL")), None);
        assert_eq!(active_filter(Some(" ")), None);
        assert_eq!(active_filter(Some("Dental")), Some("Dental"));
        assert_eq!(active_filter(None), None);
    }

    #[test]
    fn summaries_fall_back_when_lookups_miss() {
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            staff_id: None,
            service: " ".to_string(),
            scheduled_at: Utc::now(),
            status: AppointmentStatus::Pending,
            notes: None,
            cancellation_reason: None,
            reschedule_history: vec![],
            version: 1,
            created_at: None,
            updated_at: None,
        };

        let summary = summarize(appointment, &HashMap::new(), &HashMap::new());

        assert_eq!(summary.patient.name, "Unknown");
        assert_eq!(summary.patient.phone, "N/A");
        assert_eq!(summary.facility.name, "Unknown");
        assert_eq!(summary.specialist, "General");
    }

    #[test]
    fn test_message_names_patient_and_facility() {
        let at = Utc.with_ymd_and_hms(2030, 3, 4, 9, 30, 0).unwrap();
        let message = test_sms_message(None, None, at, 0);

        assert_eq!(
            message,
            "Test SMS: Hello there, this is a test reminder for your appointment at the clinic on Mon 04 Mar 2030 09:30."
        );
    }
}
