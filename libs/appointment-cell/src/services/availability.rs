// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{AppointmentError, AppointmentStatus, AvailabilityResult};

/// Half-width of the window around a candidate time in which another
/// appointment counts as a clash. Bounds are exclusive, so back-to-back
/// bookings exactly this far apart are allowed.
pub const CONFLICT_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct SlotOccupant {
    pub id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
}

/// Number of occupants clashing with `candidate`.
pub fn count_conflicts(
    occupants: &[SlotOccupant],
    candidate: DateTime<Utc>,
    exclude_appointment_id: Option<Uuid>,
) -> usize {
    let window = Duration::minutes(CONFLICT_WINDOW_MINUTES);

    occupants
        .iter()
        .filter(|o| Some(o.id) != exclude_appointment_id)
        .filter(|o| o.status.occupies_slot())
        .filter(|o| (o.scheduled_at - candidate).abs() < window)
        .count()
}

pub struct AvailabilityService {
    supabase: Arc<SupabaseClient>,
}

impl AvailabilityService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn check_availability(
        &self,
        facility_id: Uuid,
        candidate_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<AvailabilityResult, AppointmentError> {
        let window = Duration::minutes(CONFLICT_WINDOW_MINUTES);
        let start = candidate_time - window;
        let end = candidate_time + window;

        let active: Vec<&str> = AppointmentStatus::ALL
            .iter()
            .filter(|s| s.occupies_slot())
            .map(|s| s.as_str())
            .collect();

        let mut path = format!(
            "/rest/v1/appointments?select=id,scheduled_at,status&facility_id=eq.{}&scheduled_at=gt.{}&scheduled_at=lt.{}&status=in.({})",
            facility_id,
            urlencoding::encode(&start.to_rfc3339()),
            urlencoding::encode(&end.to_rfc3339()),
            active.join(",")
        );
        if let Some(exclude) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude));
        }

        debug!("Checking availability at facility {} around {}", facility_id, candidate_time);

        let occupants: Vec<SlotOccupant> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        // The store already filtered; re-applying keeps the rule in one place.
        let conflicts = count_conflicts(&occupants, candidate_time, exclude_appointment_id);

        if conflicts > 0 {
            warn!(
                "Slot at facility {} around {} has {} conflicting appointment(s)",
                facility_id, candidate_time, conflicts
            );
        }

        Ok(AvailabilityResult {
            available: conflicts == 0,
            conflicts,
        })
    }

    /// Fails with `SlotUnavailable` when the slot is taken.
    pub async fn ensure_available(
        &self,
        facility_id: Uuid,
        candidate_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let result = self
            .check_availability(facility_id, candidate_time, exclude_appointment_id, auth_token)
            .await?;

        if result.available {
            Ok(())
        } else {
            Err(AppointmentError::SlotUnavailable { conflicts: result.conflicts })
        }
    }
}
