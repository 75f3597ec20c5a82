// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    Actor, Appointment, AppointmentError, AppointmentStatus, AttemptStatus, RescheduleAction,
    RescheduleAttempt, RescheduleRequester,
};

/// The appointment state machine. Every method mutates the in-memory
/// appointment only after all of its preconditions hold, so an `Err` always
/// leaves the appointment untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::invalid_transition(
                current_status,
                &format!("move to {}", new_status),
            ));
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        use AppointmentStatus::*;

        match current_status {
            Pending => vec![Confirmed, Canceled, ReschedulePendingPatient, PendingStaffReview],
            Confirmed => vec![Canceled, Completed, ReschedulePendingPatient, PendingStaffReview],
            // A newer proposal from either side supersedes the open one.
            ReschedulePendingPatient | PendingStaffReview => vec![
                Confirmed,
                Pending,
                Canceled,
                ReschedulePendingPatient,
                PendingStaffReview,
            ],
            // Terminal states - no transitions allowed
            Canceled | Completed => vec![],
        }
    }

    pub fn confirm(&self, appointment: &mut Appointment, staff_id: Uuid) -> Result<(), AppointmentError> {
        if appointment.status != AppointmentStatus::Pending {
            return Err(AppointmentError::invalid_transition(appointment.status, "confirm"));
        }
        self.validate_status_transition(appointment.status, AppointmentStatus::Confirmed)?;

        appointment.status = AppointmentStatus::Confirmed;
        appointment.staff_id = Some(staff_id);

        info!("Appointment {} confirmed by staff {}", appointment.id, staff_id);
        Ok(())
    }

    pub fn cancel(&self, appointment: &mut Appointment, reason: Option<String>) -> Result<(), AppointmentError> {
        self.validate_status_transition(appointment.status, AppointmentStatus::Canceled)
            .map_err(|_| AppointmentError::invalid_transition(appointment.status, "cancel"))?;

        appointment.status = AppointmentStatus::Canceled;
        appointment.cancellation_reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        info!("Appointment {} canceled", appointment.id);
        Ok(())
    }

    pub fn complete(&self, appointment: &mut Appointment) -> Result<(), AppointmentError> {
        if appointment.status != AppointmentStatus::Confirmed {
            return Err(AppointmentError::invalid_transition(appointment.status, "complete"));
        }

        appointment.status = AppointmentStatus::Completed;

        info!("Appointment {} completed", appointment.id);
        Ok(())
    }

    /// Appends a pending attempt from `actor` and moves the appointment into
    /// the matching waiting state. Any attempt still pending is rejected as
    /// superseded so at most one is ever open.
    ///
    /// Staff may propose on any active appointment; patients only on their own.
    pub fn propose_reschedule(
        &self,
        appointment: &mut Appointment,
        actor: &Actor,
        new_time: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RescheduleAttempt, AppointmentError> {
        if !actor.is_staff && !appointment.is_owned_by(&actor.id) {
            return Err(AppointmentError::Forbidden(
                "Only the patient who owns this appointment can request a reschedule".to_string(),
            ));
        }

        let next_status = match actor.side() {
            RescheduleRequester::Staff => AppointmentStatus::ReschedulePendingPatient,
            RescheduleRequester::Patient => AppointmentStatus::PendingStaffReview,
        };

        self.validate_status_transition(appointment.status, next_status)
            .map_err(|_| AppointmentError::invalid_transition(appointment.status, "reschedule"))?;

        if new_time <= now {
            return Err(AppointmentError::ValidationError("newTime must be in the future".to_string()));
        }

        for open in appointment
            .reschedule_history
            .iter_mut()
            .filter(|attempt| attempt.status == AttemptStatus::Pending)
        {
            debug!("Superseding reschedule attempt {}", open.id);
            open.status = AttemptStatus::Rejected;
            open.responded_by = Some(actor.id.clone());
            open.responded_at = Some(now);
        }

        let attempt = RescheduleAttempt {
            id: Uuid::new_v4(),
            requested_by: actor.side(),
            requested_by_id: actor.id.clone(),
            original_time: appointment.scheduled_at,
            proposed_time: new_time,
            reason: reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            status: AttemptStatus::Pending,
            responded_by: None,
            responded_at: None,
            created_at: now,
        };

        appointment.reschedule_history.push(attempt.clone());
        appointment.status = next_status;

        info!(
            "Reschedule of appointment {} proposed by {} for {}",
            appointment.id, attempt.requested_by, new_time
        );
        Ok(attempt)
    }

    /// Resolves the latest pending attempt. Staff answer patient requests
    /// (`pending_staff_review`); the owning patient answers staff proposals
    /// (`reschedule_pending_patient`).
    pub fn respond_to_reschedule(
        &self,
        appointment: &mut Appointment,
        actor: &Actor,
        action: RescheduleAction,
        now: DateTime<Utc>,
    ) -> Result<RescheduleAttempt, AppointmentError> {
        match appointment.status {
            AppointmentStatus::PendingStaffReview if !actor.is_staff => {
                return Err(AppointmentError::Forbidden(
                    "Only staff can respond to a patient's reschedule request".to_string(),
                ));
            }
            AppointmentStatus::ReschedulePendingPatient if !appointment.is_owned_by(&actor.id) => {
                return Err(AppointmentError::Forbidden(
                    "Only the patient can respond to a staff reschedule proposal".to_string(),
                ));
            }
            AppointmentStatus::PendingStaffReview | AppointmentStatus::ReschedulePendingPatient => {}
            other => return Err(AppointmentError::invalid_transition(other, "respond to a reschedule for")),
        }

        let current_status = appointment.status;
        let reverted_status = if appointment.staff_id.is_some() {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Pending
        };
        let staff_id = appointment.staff_id;

        let attempt = appointment
            .latest_pending_attempt_mut()
            .ok_or_else(|| AppointmentError::invalid_transition(current_status, "respond to a reschedule for"))?;

        attempt.responded_by = Some(actor.id.clone());
        attempt.responded_at = Some(now);

        let (next_status, new_time) = match action {
            RescheduleAction::Approve => {
                attempt.status = AttemptStatus::Approved;
                (AppointmentStatus::Confirmed, Some(attempt.proposed_time))
            }
            RescheduleAction::Reject => {
                attempt.status = AttemptStatus::Rejected;
                (reverted_status, None)
            }
        };
        let resolved = attempt.clone();

        if let Some(new_time) = new_time {
            appointment.scheduled_at = new_time;
            // Staff approving an unassigned appointment take it on.
            if staff_id.is_none() && actor.is_staff {
                appointment.staff_id = Uuid::parse_str(&actor.id).ok();
            }
        }
        appointment.status = next_status;

        info!(
            "Reschedule attempt {} on appointment {} {} by {}",
            resolved.id, appointment.id, resolved.status, actor.side()
        );
        Ok(resolved)
    }

    /// Routes a generic status update through the dedicated transitions.
    pub fn apply_status_update(
        &self,
        appointment: &mut Appointment,
        actor: &Actor,
        new_status: AppointmentStatus,
        cancellation_reason: Option<String>,
    ) -> Result<(), AppointmentError> {
        match new_status {
            AppointmentStatus::Canceled => {
                if !actor.is_staff && !appointment.is_owned_by(&actor.id) {
                    return Err(AppointmentError::Forbidden(
                        "You can only cancel your own appointments".to_string(),
                    ));
                }
                self.cancel(appointment, cancellation_reason)
            }
            AppointmentStatus::Confirmed | AppointmentStatus::Completed if !actor.is_staff => Err(
                AppointmentError::Forbidden(format!("Only staff can mark an appointment {}", new_status)),
            ),
            AppointmentStatus::Confirmed => {
                let staff_id = Uuid::parse_str(&actor.id)
                    .map_err(|_| AppointmentError::ValidationError("Invalid staff id".to_string()))?;
                self.confirm(appointment, staff_id)
            }
            AppointmentStatus::Completed => self.complete(appointment),
            AppointmentStatus::Pending => Err(AppointmentError::invalid_transition(
                appointment.status,
                "move back to pending",
            )),
            AppointmentStatus::ReschedulePendingPatient | AppointmentStatus::PendingStaffReview => Err(
                AppointmentError::ValidationError(
                    "status must be one of pending, confirmed, canceled, completed".to_string(),
                ),
            ),
        }
    }
}
