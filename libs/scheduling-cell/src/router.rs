// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;

use crate::handlers;

pub fn scheduling_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        // Calendar grid
        .route("/calendar", get(handlers::get_calendar))

        // Booking workflow
        .route("/appointments", post(handlers::create_appointment).put(handlers::update_appointment))
        .route("/appointments/slot", get(handlers::get_appointment_by_slot))
        .route("/appointments/cancel", post(handlers::cancel_appointment))
        .route("/appointments/reschedule", post(handlers::reschedule_appointment))
        .route("/appointments/reschedule/retry", post(handlers::retry_reschedule))

        // Fixer availability
        .route("/availability/toggle", post(handlers::toggle_availability))

        .with_state(state)
}
