use std::sync::Arc;

use axum::{
    Json,
    Router,
    routing::get,
};
use serde_json::{json, Value};

use appointment_cell::appointment_routes;
use reminder_cell::{reminder_routes, sms_routes};
use shared_config::AppConfig;

const SERVICE_NAME: &str = "clinic-api";

async fn index() -> Json<Value> {
    Json(json!({ "service": SERVICE_NAME, "status": "running" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "service": SERVICE_NAME, "status": "ok" }))
}

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/reminders", reminder_routes(state.clone()))
        .nest("/sms", sms_routes(state))
}
