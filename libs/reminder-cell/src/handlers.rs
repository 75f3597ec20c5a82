// libs/reminder-cell/src/handlers.rs
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::{FormRejection, JsonRejection}, Extension, Path, Query, State},
    http::StatusCode,
    Form, Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::ReminderQuery;
use crate::services::{DeliveryReceiptService, ReminderStore};

// ==============================================================================
// REMINDER LOGS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_reminders(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<ReminderQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let supabase = Arc::new(SupabaseClient::new(&state));
    let store = ReminderStore::new(supabase.clone());

    // Patients only ever see reminders addressed to their own phone.
    let (phone, facility_id) = if user.is_staff() {
        (None, query.facility_id)
    } else {
        let profile_phone = match Uuid::parse_str(&user.id) {
            Ok(user_id) => supabase
                .get_profile(user_id, token)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?
                .and_then(|profile| profile.phone),
            Err(_) => None,
        };

        match profile_phone.or_else(|| user.phone.clone()) {
            Some(phone) => (Some(phone), None),
            None => {
                return Ok(Json(json!({ "reminders": [], "count": 0 })));
            }
        }
    };

    let reminders = store
        .list(query.status, phone.as_deref(), facility_id, query.effective_limit(), token)
        .await?;

    Ok(Json(json!({
        "reminders": reminders,
        "count": reminders.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_reminder_by_message_id(
    State(state): State<Arc<AppConfig>>,
    Path(message_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let store = ReminderStore::new(Arc::new(SupabaseClient::new(&state)));

    let reminder = store
        .find_by_provider_message_id(&message_id, auth.token())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No reminder for message {}", message_id)))?;

    Ok(Json(json!(reminder)))
}

// ==============================================================================
// PROVIDER CALLBACKS
// ==============================================================================

/// Form-encoded delivery reports (Africa's Talking, Twilio).
pub async fn sms_callback_form(
    State(state): State<Arc<AppConfig>>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> (StatusCode, &'static str) {
    match form {
        Ok(Form(fields)) => {
            let payload: Value = fields
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect::<serde_json::Map<_, _>>()
                .into();
            apply_receipt(&state, payload).await;
        }
        Err(e) => warn!("Unreadable SMS callback form: {}", e),
    }

    (StatusCode::OK, "ok")
}

pub async fn sms_callback_json(
    State(state): State<Arc<AppConfig>>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, &'static str) {
    match body {
        Ok(Json(payload)) => apply_receipt(&state, payload).await,
        Err(e) => warn!("Unreadable SMS callback body: {}", e),
    }

    (StatusCode::OK, "ok")
}

// Providers retry anything but a 200, so failures stop here.
async fn apply_receipt(config: &AppConfig, payload: Value) {
    let service = DeliveryReceiptService::new(config);

    if let Err(e) = service.process(&payload).await {
        error!("Failed to apply delivery receipt: {}", e);
    }
}
