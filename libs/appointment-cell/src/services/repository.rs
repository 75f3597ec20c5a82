// libs/appointment-cell/src/services/repository.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::{return_representation, SupabaseClient};

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

/// Filters for the staff dashboard listing. `None` means "no filter".
#[derive(Debug, Clone, Default)]
pub struct AppointmentRangeFilter {
    pub status: Option<AppointmentStatus>,
    pub service: Option<String>,
}

/// PostgREST access to `appointments`. Writes are guarded by the row
/// `version` so two concurrent actions cannot both apply.
#[derive(Clone)]
pub struct AppointmentRepository {
    supabase: Arc<SupabaseClient>,
}

impl AppointmentRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn get(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(rows.into_iter().next())
    }

    pub async fn get_required(&self, appointment_id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError> {
        self.get(appointment_id, auth_token)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn insert(&self, row: Value, auth_token: &str) -> Result<Appointment, AppointmentError> {
        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(row),
                Some(return_representation()),
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppointmentError::DatabaseError("Insert returned no row".to_string()))
    }

    /// Writes the mutable fields of `appointment` if nobody else has written
    /// since it was read.
    pub async fn save(&self, appointment: &Appointment, auth_token: &str) -> Result<Appointment, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&version=eq.{}",
            appointment.id, appointment.version
        );
        let body = json!({
            "status": appointment.status,
            "staff_id": appointment.staff_id,
            "scheduled_at": appointment.scheduled_at.to_rfc3339(),
            "cancellation_reason": appointment.cancellation_reason,
            "reschedule_history": appointment.reschedule_history,
            "version": appointment.version + 1,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(return_representation()))
            .await?;

        match rows.into_iter().next() {
            Some(saved) => {
                debug!("Appointment {} saved at version {}", saved.id, saved.version);
                Ok(saved)
            }
            None => {
                warn!(
                    "Appointment {} changed since version {} was read",
                    appointment.id, appointment.version
                );
                Err(AppointmentError::ConcurrentModification)
            }
        }
    }

    pub async fn list_for_patient(&self, patient_id: &str, auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=scheduled_at.desc",
            urlencoding::encode(patient_id)
        );
        self.list(&path, auth_token).await
    }

    pub async fn list_for_facility(&self, facility_id: Uuid, auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?facility_id=eq.{}&order=scheduled_at.desc", facility_id);
        self.list(&path, auth_token).await
    }

    pub async fn list_all(&self, auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        self.list("/rest/v1/appointments?order=scheduled_at.desc", auth_token).await
    }

    /// Appointments with `start <= scheduled_at <= end`, oldest first.
    pub async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &AppointmentRangeFilter,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?scheduled_at=gte.{}&scheduled_at=lte.{}",
            urlencoding::encode(&start.to_rfc3339()),
            urlencoding::encode(&end.to_rfc3339())
        );
        if let Some(status) = filter.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        if let Some(service) = &filter.service {
            path.push_str(&format!("&service=eq.{}", urlencoding::encode(service)));
        }
        path.push_str("&order=scheduled_at.asc");

        self.list(&path, auth_token).await
    }

    async fn list(&self, path: &str, auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await?;

        Ok(rows)
    }
}
