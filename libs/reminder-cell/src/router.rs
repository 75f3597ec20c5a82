// libs/reminder-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::{auth_middleware, staff_middleware};

use crate::handlers;

pub fn reminder_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", get(handlers::list_reminders))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

pub fn sms_routes(state: Arc<AppConfig>) -> Router {
    // Provider callbacks carry no user token.
    let public_routes = Router::new()
        .route("/callback", post(handlers::sms_callback_form))
        .route("/callback/json", post(handlers::sms_callback_json));

    let staff_routes = Router::new()
        .route("/reminder/{message_id}", get(handlers::get_reminder_by_message_id))
        .route_layer(middleware::from_fn(staff_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(staff_routes)
        .with_state(state)
}
