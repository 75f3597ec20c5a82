// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::{auth_middleware, staff_middleware};

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_my_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment).patch(handlers::update_appointment_status))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule/patient", post(handlers::request_reschedule_as_patient))
        .route("/{appointment_id}/reschedule/respond", post(handlers::respond_to_reschedule))
        .route("/{appointment_id}/reschedule/history", get(handlers::get_reschedule_history))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let staff_routes = Router::new()
        .route("/all", get(handlers::list_all_appointments))
        .route("/staff", get(handlers::staff_dashboard))
        .route("/facility/{facility_id}", get(handlers::list_facility_appointments))
        .route("/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/{appointment_id}/reschedule/staff", post(handlers::propose_reschedule_as_staff))
        .route("/{appointment_id}/send-test-sms", post(handlers::send_test_sms))
        .route_layer(middleware::from_fn(staff_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .merge(staff_routes)
        .with_state(state)
}
