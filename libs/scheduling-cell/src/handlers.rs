// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::error::SchedulingError;
use crate::models::{Granularity, PendingReschedule, Role, Slot, SlotKey};
use crate::services::availability::AvailabilityIndex;
use crate::services::backend::{AppointmentBackend, RestAppointmentBackend};
use crate::services::booking::{prefill, BookingWorkflow, WorkflowSettings, WorkflowState};
use crate::services::calendar::CalendarViewController;
use crate::services::slot::SlotRenderer;
use crate::services::time_offset::{is_past, ScheduleClock};
use crate::services::validation::BookingForm;

// ==============================================================================
// REQUEST STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub fixer_id: Uuid,
    pub role: Role,
    pub granularity: Option<Granularity>,
    pub anchor: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub date: NaiveDate,
    pub hour: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub slot: Slot,
    pub form: BookingForm,
}

#[derive(Debug, Deserialize)]
pub struct EditAppointmentRequest {
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub slot: Slot,
    pub form: BookingForm,
}

#[derive(Debug, Deserialize)]
pub struct CancelAppointmentRequest {
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub slot: Slot,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub slot: Slot,
    pub new_slot: Slot,
    pub form: BookingForm,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetryRescheduleRequest {
    pub pending: PendingReschedule,
    /// Alternate target when the pending one was refused.
    #[serde(default)]
    pub new_slot: Option<Slot>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleAvailabilityRequest {
    pub fixer_id: Uuid,
    pub slot: Slot,
    pub disabled: bool,
}

// ==============================================================================
// PER-REQUEST WIRING
// ==============================================================================

/// Backend, index and workflow bound to the caller's token for one request.
/// The index starts with no visible dates, so mutations never trigger
/// availability reloads; only the calendar endpoint loads.
struct RequestScope {
    config: Arc<AppConfig>,
    backend: Arc<dyn AppointmentBackend>,
    index: Arc<AvailabilityIndex>,
}

impl RequestScope {
    fn new(config: Arc<AppConfig>, auth: &Authorization<Bearer>) -> Self {
        let backend: Arc<dyn AppointmentBackend> =
            Arc::new(RestAppointmentBackend::new(&config, Some(auth.token().to_string())));
        let index = Arc::new(AvailabilityIndex::from_config(Arc::clone(&backend), &config));
        Self { config, backend, index }
    }

    fn workflow(&self) -> BookingWorkflow {
        BookingWorkflow::from_config(Arc::clone(&self.backend), Arc::clone(&self.index), &self.config)
    }

    fn clock(&self) -> ScheduleClock {
        ScheduleClock::from_config(&self.config)
    }

    fn reject_past(&self, slot: Slot) -> Result<(), AppError> {
        if is_past(slot, self.clock().now_local()) {
            return Err(AppError::BadRequest(format!("Slot {} is in the past", slot)));
        }
        Ok(())
    }
}

fn slot_from_query(query: &SlotQuery) -> Result<SlotKey, AppError> {
    Ok(SlotKey {
        fixer_id: query.fixer_id,
        requester_id: query.requester_id,
        slot: Slot::new(query.date, query.hour)?,
    })
}

// ==============================================================================
// CALENDAR
// ==============================================================================

pub async fn get_calendar(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = RequestScope::new(state, &auth);
    let clock = scope.clock();
    let now = clock.now_local();

    let calendar = CalendarViewController::new(
        query.granularity.unwrap_or_default(),
        query.anchor.unwrap_or_else(|| now.date()),
    );
    let dates = calendar.visible_dates();
    debug!("Rendering {} calendar for fixer {} ({} dates)", calendar.granularity(), query.fixer_id, dates.len());

    scope.index.load_visible(query.fixer_id, &dates).await;
    let view = scope.index.view(query.fixer_id, &dates).await;

    let degraded: Vec<NaiveDate> = dates.iter()
        .copied()
        .filter(|date| view.snapshot(*date).is_some_and(|s| s.load_failed))
        .collect();

    let renderer = SlotRenderer::from_config(&scope.config);
    let response = renderer.render_calendar(query.fixer_id, &calendar, query.role, &view, now);

    Ok(Json(json!({
        "success": true,
        "calendar": response,
        "degraded_dates": degraded,
    })))
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

pub async fn get_appointment_by_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let key = slot_from_query(&query)?;
    let scope = RequestScope::new(state, &auth);
    let mut workflow = scope.workflow();

    let appointment = workflow.open_edit(key).await?;
    let form = prefill(&appointment);

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "form": form,
    })))
}

pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let scope = RequestScope::new(state, &auth);
    scope.reject_past(request.slot)?;

    let mut workflow = scope.workflow();
    workflow.open_create(request.fixer_id, request.requester_id, request.slot)?;
    let appointment = workflow.submit_create(&request.form).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked",
    }))))
}

pub async fn update_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<EditAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let scope = RequestScope::new(state, &auth);
    let mut workflow = scope.workflow();

    workflow.open_edit(SlotKey {
        fixer_id: request.fixer_id,
        requester_id: request.requester_id,
        slot: request.slot,
    }).await?;
    let appointment = workflow.submit_edit(&request.form).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated",
    })))
}

pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let scope = RequestScope::new(state, &auth);
    let mut workflow = scope.workflow();

    workflow.open_edit(SlotKey {
        fixer_id: request.fixer_id,
        requester_id: request.requester_id,
        slot: request.slot,
    }).await?;
    let appointment = workflow.cancel(request.reason).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled",
    })))
}

pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let scope = RequestScope::new(state, &auth);
    scope.reject_past(request.new_slot)?;

    let mut workflow = scope.workflow();
    workflow.open_edit(SlotKey {
        fixer_id: request.fixer_id,
        requester_id: request.requester_id,
        slot: request.slot,
    }).await?;

    match workflow.reschedule(request.new_slot, &request.form, request.reason).await {
        Ok(summary) => Ok(Json(json!({
            "success": true,
            "reschedule": summary,
            "message": "Appointment rescheduled",
        }))),
        Err(e) => Err(partial_failure(&workflow, e)),
    }
}

pub async fn retry_reschedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<RetryRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let scope = RequestScope::new(state, &auth);
    scope.reject_past(request.new_slot.unwrap_or(request.pending.new_slot))?;

    let mut workflow = BookingWorkflow::resume(
        Arc::clone(&scope.backend),
        Arc::clone(&scope.index),
        WorkflowSettings::from_config(&scope.config),
        request.pending,
    );

    let result = match request.new_slot {
        Some(new_slot) => workflow.retry_reschedule_at(new_slot).await,
        None => workflow.retry_reschedule().await,
    };

    match result {
        Ok(summary) => Ok(Json(json!({
            "success": true,
            "reschedule": summary,
            "message": "Appointment rescheduled",
        }))),
        Err(e) => Err(partial_failure(&workflow, e)),
    }
}

/// Adds the pending record to a partial reschedule error so the caller can
/// hand it back to the retry endpoint.
fn partial_failure(workflow: &BookingWorkflow, err: SchedulingError) -> AppError {
    match (workflow.state(), &err) {
        (WorkflowState::RescheduleIncomplete { pending }, SchedulingError::RescheduleIncomplete { original_id, .. }) => {
            warn!("Reschedule of {} left incomplete after {} attempt(s)", original_id, pending.attempts);
            AppError::PartialFailure(json!({
                "error": err.to_string(),
                "stage": "reschedule_incomplete",
                "original_id": original_id,
                "pending": pending,
                "retry": "/scheduling/appointments/reschedule/retry",
            }))
        }
        _ => err.into(),
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

pub async fn toggle_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<ToggleAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let scope = RequestScope::new(state, &auth);
    scope.reject_past(request.slot)?;

    scope.workflow()
        .toggle_hour_disabled(request.fixer_id, request.slot, request.disabled)
        .await?;

    Ok(Json(json!({
        "success": true,
        "fixer_id": request.fixer_id,
        "slot": request.slot,
        "disabled": request.disabled,
    })))
}
