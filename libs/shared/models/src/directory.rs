use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row of the `profiles` table. Only the fields the booking core reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub facility_id: Option<Uuid>,
    #[serde(default)]
    pub consent_sms: bool,
}

impl Profile {
    /// Phone number to text, if the user opted in and has one on file.
    pub fn sms_destination(&self) -> Option<&str> {
        match self.phone.as_deref() {
            Some(phone) if self.consent_sms && !phone.trim().is_empty() => Some(phone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Facility {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub contact_number: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
}
