// libs/appointment-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use sms_cell::SmsError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub service: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub reschedule_history: Vec<RescheduleAttempt>,
    /// Bumped on every write; used for optimistic concurrency.
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id
    }

    /// The pending attempt with the newest `created_at`.
    pub fn latest_pending_attempt(&self) -> Option<&RescheduleAttempt> {
        self.reschedule_history
            .iter()
            .filter(|attempt| attempt.status == AttemptStatus::Pending)
            .max_by_key(|attempt| attempt.created_at)
    }

    pub fn latest_pending_attempt_mut(&mut self) -> Option<&mut RescheduleAttempt> {
        self.reschedule_history
            .iter_mut()
            .filter(|attempt| attempt.status == AttemptStatus::Pending)
            .max_by_key(|attempt| attempt.created_at)
    }

    /// The staff member who speaks for this appointment: the assignee, or
    /// whoever last proposed a new time while it was unassigned.
    pub fn responsible_staff_id(&self) -> Option<Uuid> {
        self.staff_id.or_else(|| {
            self.reschedule_history
                .iter()
                .filter(|attempt| attempt.requested_by == RescheduleRequester::Staff)
                .max_by_key(|attempt| attempt.created_at)
                .and_then(|attempt| Uuid::parse_str(&attempt.requested_by_id).ok())
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    #[serde(alias = "cancelled")]
    Canceled,
    Completed,
    /// Staff proposed a new time; waiting for the patient.
    ReschedulePendingPatient,
    /// Patient asked for a new time; waiting for staff.
    PendingStaffReview,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Canceled,
        AppointmentStatus::Completed,
        AppointmentStatus::ReschedulePendingPatient,
        AppointmentStatus::PendingStaffReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::ReschedulePendingPatient => "reschedule_pending_patient",
            AppointmentStatus::PendingStaffReview => "pending_staff_review",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Canceled | AppointmentStatus::Completed)
    }

    /// Statuses that hold a slot for the availability check.
    pub fn occupies_slot(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppointmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancelled" => Ok(AppointmentStatus::Canceled),
            other => AppointmentStatus::ALL
                .iter()
                .find(|status| status.as_str() == other)
                .copied()
                .ok_or_else(|| AppointmentError::ValidationError(format!("Unknown status: {}", other))),
        }
    }
}

// ==============================================================================
// RESCHEDULE NEGOTIATION
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RescheduleRequester {
    Patient,
    Staff,
}

impl fmt::Display for RescheduleRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RescheduleRequester::Patient => write!(f, "patient"),
            RescheduleRequester::Staff => write!(f, "staff"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::Pending => write!(f, "pending"),
            AttemptStatus::Approved => write!(f, "approved"),
            AttemptStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// One proposed time change. Attempts are only ever appended; resolving one
/// updates its status fields in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduleAttempt {
    pub id: Uuid,
    pub requested_by: RescheduleRequester,
    pub requested_by_id: String,
    pub original_time: DateTime<Utc>,
    pub proposed_time: DateTime<Utc>,
    pub reason: Option<String>,
    pub status: AttemptStatus,
    pub responded_by: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RescheduleAction {
    Approve,
    Reject,
}

/// Who is acting on an appointment.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: String,
    pub is_staff: bool,
}

impl Actor {
    pub fn staff(id: impl Into<String>) -> Self {
        Self { id: id.into(), is_staff: true }
    }

    pub fn patient(id: impl Into<String>) -> Self {
        Self { id: id.into(), is_staff: false }
    }

    pub fn side(&self) -> RescheduleRequester {
        if self.is_staff {
            RescheduleRequester::Staff
        } else {
            RescheduleRequester::Patient
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    #[serde(alias = "facility_id")]
    pub facility_id: Uuid,
    pub service: String,
    #[serde(alias = "scheduled_at")]
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentStatusRequest {
    pub status: AppointmentStatus,
    #[serde(alias = "cancellation_reason")]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    #[serde(alias = "new_time")]
    pub new_time: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespondRescheduleRequest {
    pub action: RescheduleAction,
}

// ==============================================================================
// STAFF DASHBOARD
// ==============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StaffDashboardQuery {
    #[serde(alias = "start_date")]
    pub start_date: Option<String>,
    #[serde(alias = "end_date")]
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub specialist: Option<String>,
    #[serde(alias = "time_block")]
    pub time_block: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeBlock {
    Morning,
    Afternoon,
    Evening,
}

impl TimeBlock {
    /// Half-open local-hour ranges: morning [6,12), afternoon [12,17), evening [17,21).
    pub fn contains_hour(&self, hour: u32) -> bool {
        match self {
            TimeBlock::Morning => (6..12).contains(&hour),
            TimeBlock::Afternoon => (12..17).contains(&hour),
            TimeBlock::Evening => (17..21).contains(&hour),
        }
    }
}

impl FromStr for TimeBlock {
    type Err = AppointmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(TimeBlock::Morning),
            "afternoon" => Ok(TimeBlock::Afternoon),
            "evening" => Ok(TimeBlock::Evening),
            other => Err(AppointmentError::ValidationError(format!("Unknown time block: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatientSummary {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FacilitySummary {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StaffAppointmentSummary {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub patient: PatientSummary,
    pub facility: FacilitySummary,
    pub specialist: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct AvailabilityResult {
    pub available: bool,
    pub conflicts: usize,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Facility not found")]
    FacilityNotFound,

    #[error("Cannot {action} an appointment that is {from}")]
    InvalidTransition { from: AppointmentStatus, action: String },

    #[error("Requested time conflicts with {conflicts} existing appointment(s)")]
    SlotUnavailable { conflicts: usize },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Appointment was modified concurrently; reload and retry")]
    ConcurrentModification,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    Sms(#[from] SmsError),
}

impl AppointmentError {
    pub fn invalid_transition(from: AppointmentStatus, action: &str) -> Self {
        AppointmentError::InvalidTransition { from, action: action.to_string() }
    }
}

impl From<anyhow::Error> for AppointmentError {
    fn from(e: anyhow::Error) -> Self {
        AppointmentError::DatabaseError(e.to_string())
    }
}

impl From<reminder_cell::ReminderError> for AppointmentError {
    fn from(e: reminder_cell::ReminderError) -> Self {
        AppointmentError::DatabaseError(e.to_string())
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
            AppointmentError::FacilityNotFound => AppError::NotFound("Facility not found".to_string()),
            AppointmentError::InvalidTransition { .. } => AppError::BadRequest(e.to_string()),
            AppointmentError::SlotUnavailable { conflicts } => AppError::ConflictWithDetails {
                message: "Requested time slot is not available".to_string(),
                details: json!({ "code": "slot_unavailable", "conflicts": conflicts }),
            },
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::ConcurrentModification => AppError::Conflict(e.to_string()),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
            AppointmentError::Sms(e) => AppError::ExternalService(e.to_string()),
        }
    }
}
