// libs/appointment-cell/src/services/directory.rs
use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;
use shared_models::directory::{Facility, Profile};

use crate::models::AppointmentError;

/// Read-only lookups of users and facilities.
#[derive(Clone)]
pub struct DirectoryService {
    supabase: Arc<SupabaseClient>,
}

impl DirectoryService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn get_profile(&self, user_id: Uuid, auth_token: &str) -> Result<Option<Profile>, AppointmentError> {
        Ok(self.supabase.get_profile(user_id, auth_token).await?)
    }

    pub async fn get_facility(&self, facility_id: Uuid, auth_token: &str) -> Result<Option<Facility>, AppointmentError> {
        Ok(self.supabase.get_facility(facility_id, auth_token).await?)
    }

    pub async fn profiles_by_ids(
        &self,
        ids: &[Uuid],
        auth_token: &str,
    ) -> Result<HashMap<Uuid, Profile>, AppointmentError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let path = format!("/rest/v1/profiles?id=in.({})", join_ids(ids));
        let rows: Vec<Profile> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;

        Ok(rows.into_iter().map(|p| (p.id, p)).collect())
    }

    pub async fn facilities_by_ids(
        &self,
        ids: &[Uuid],
        auth_token: &str,
    ) -> Result<HashMap<Uuid, Facility>, AppointmentError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let path = format!("/rest/v1/facilities?id=in.({})", join_ids(ids));
        let rows: Vec<Facility> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;

        Ok(rows.into_iter().map(|f| (f.id, f)).collect())
    }
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",")
}
