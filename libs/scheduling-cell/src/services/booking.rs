// libs/scheduling-cell/src/services/booking.rs
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::SchedulingError;
use crate::models::{
    Appointment, AppointmentDetails, AppointmentUpdate, BookingOutcome, NewAppointment,
    PendingReschedule, RescheduleSummary, ScheduleState, Slot, SlotKey, UpdateOutcome,
};
use crate::services::availability::AvailabilityIndex;
use crate::services::backend::{call_with_timeout, AppointmentBackend};
use crate::services::debounce::DebouncedValidator;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::time_offset::ScheduleClock;
use crate::services::validation::{validate_booking_form, BookingForm, ValidationErrors};

/// The form a failed submission returns to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FormContext {
    Create { fixer_id: Uuid, requester_id: Uuid, slot: Slot },
    Edit { appointment: Appointment },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Edit,
    Cancel,
    Reschedule,
}

/// Observable state of one booking inspector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    Closed,
    Creating { fixer_id: Uuid, requester_id: Uuid, slot: Slot },
    LoadingExisting { key: SlotKey },
    Editing { appointment: Appointment },
    Submitting { operation: Operation },
    Done { outcome: BookingOutcome },
    Failed { form: Option<FormContext>, message: String, retryable: bool },
    RescheduleIncomplete { pending: PendingReschedule },
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Closed => "closed",
            WorkflowState::Creating { .. } => "creating",
            WorkflowState::LoadingExisting { .. } => "loading_existing",
            WorkflowState::Editing { .. } => "editing",
            WorkflowState::Submitting { .. } => "submitting",
            WorkflowState::Done { .. } => "done",
            WorkflowState::Failed { .. } => "failed",
            WorkflowState::RescheduleIncomplete { .. } => "reschedule_incomplete",
        }
    }

    fn form(&self) -> Option<FormContext> {
        match self {
            WorkflowState::Creating { fixer_id, requester_id, slot } => Some(FormContext::Create {
                fixer_id: *fixer_id,
                requester_id: *requester_id,
                slot: *slot,
            }),
            WorkflowState::Editing { appointment } => Some(FormContext::Edit {
                appointment: appointment.clone(),
            }),
            WorkflowState::Failed { form, .. } => form.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    pub clock: ScheduleClock,
    pub request_timeout: Duration,
    pub reschedule_create_attempts: u32,
    pub validation_debounce: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            clock: ScheduleClock::default(),
            request_timeout: Duration::from_secs(10),
            reschedule_create_attempts: 2,
            validation_debounce: Duration::from_millis(300),
        }
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            clock: ScheduleClock::from_config(config),
            request_timeout: config.request_timeout(),
            reschedule_create_attempts: config.reschedule_create_attempts,
            validation_debounce: config.validation_debounce(),
        }
    }
}

/// Drives create, edit, cancel and reschedule for one appointment inspector.
///
/// Every form is validated before any backend call. Mutating methods take
/// `&mut self`, so a second submission cannot start while one is in flight.
/// Presentation code observes progress through [`BookingWorkflow::subscribe`].
pub struct BookingWorkflow {
    backend: Arc<dyn AppointmentBackend>,
    index: Arc<AvailabilityIndex>,
    lifecycle: AppointmentLifecycleService,
    settings: WorkflowSettings,
    draft_validator: DebouncedValidator,
    state: watch::Sender<WorkflowState>,
}

impl BookingWorkflow {
    pub fn new(backend: Arc<dyn AppointmentBackend>, index: Arc<AvailabilityIndex>, settings: WorkflowSettings) -> Self {
        let (state, _) = watch::channel(WorkflowState::Closed);
        Self {
            backend,
            index,
            lifecycle: AppointmentLifecycleService::new(),
            draft_validator: DebouncedValidator::new(settings.validation_debounce),
            settings,
            state,
        }
    }

    pub fn from_config(backend: Arc<dyn AppointmentBackend>, index: Arc<AvailabilityIndex>, config: &AppConfig) -> Self {
        Self::new(backend, index, WorkflowSettings::from_config(config))
    }

    /// Rebuilds a workflow parked in the partial reschedule state, e.g. from
    /// a pending record a client handed back. Nothing in the record is
    /// trusted until a retry re-verifies it against the backend.
    pub fn resume(
        backend: Arc<dyn AppointmentBackend>,
        index: Arc<AvailabilityIndex>,
        settings: WorkflowSettings,
        pending: PendingReschedule,
    ) -> Self {
        let workflow = Self::new(backend, index, settings);
        workflow.transition(WorkflowState::RescheduleIncomplete { pending });
        workflow
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    fn transition(&self, next: WorkflowState) {
        debug!("Booking workflow -> {}", next.name());
        self.state.send_replace(next);
    }

    fn ensure_can_open(&self) -> Result<(), SchedulingError> {
        let blocked = matches!(
            &*self.state.borrow(),
            WorkflowState::RescheduleIncomplete { .. } | WorkflowState::Submitting { .. }
        );
        if blocked {
            return Err(self.wrong_state());
        }
        Ok(())
    }

    fn wrong_state(&self) -> SchedulingError {
        SchedulingError::InvalidWorkflowState(self.state.borrow().name().to_string())
    }

    fn fail(&self, form: Option<FormContext>, error: &SchedulingError) {
        self.transition(WorkflowState::Failed {
            form,
            message: error.to_string(),
            retryable: error.is_retryable(),
        });
    }

    /// Validates a form still being typed. Returns `None` when a newer draft
    /// arrived within the debounce window; only the settled draft is checked.
    pub async fn validate_draft(&self, form: BookingForm) -> Option<Result<AppointmentDetails, ValidationErrors>> {
        self.draft_validator.validate(form).await
    }

    /// Discards the current form. A pending partial reschedule is dropped too;
    /// the cancelled original stays cancelled.
    pub fn close(&mut self) {
        if let WorkflowState::RescheduleIncomplete { pending } = &*self.state.borrow() {
            warn!(
                "Closing booking workflow with unfinished reschedule of {} to {}",
                pending.cancelled.id, pending.new_slot
            );
        }
        self.draft_validator.cancel();
        self.transition(WorkflowState::Closed);
    }

    // ==============================================================================
    // CREATE
    // ==============================================================================

    pub fn open_create(&mut self, fixer_id: Uuid, requester_id: Uuid, slot: Slot) -> Result<(), SchedulingError> {
        self.ensure_can_open()?;
        self.transition(WorkflowState::Creating { fixer_id, requester_id, slot });
        Ok(())
    }

    #[instrument(skip(self, form))]
    pub async fn submit_create(&mut self, form: &BookingForm) -> Result<Appointment, SchedulingError> {
        let (fixer_id, requester_id, slot) = match self.state().form() {
            Some(FormContext::Create { fixer_id, requester_id, slot }) => (fixer_id, requester_id, slot),
            _ => return Err(self.wrong_state()),
        };
        let form_context = FormContext::Create { fixer_id, requester_id, slot };
        self.draft_validator.cancel();

        let details = validate_booking_form(form).map_err(SchedulingError::Validation)?;

        self.transition(WorkflowState::Submitting { operation: Operation::Create });
        let new = NewAppointment { fixer_id, requester_id, slot, details };

        match call_with_timeout(self.settings.request_timeout, self.backend.create_appointment(new)).await {
            Ok(appointment) => {
                info!("Booked appointment {} at {} for fixer {}", appointment.id, slot, fixer_id);
                self.reflect_booked(fixer_id, slot).await;
                self.transition(WorkflowState::Done {
                    outcome: BookingOutcome::Created { appointment: appointment.clone() },
                });
                Ok(appointment)
            }
            Err(e) => {
                warn!("Create at {} for fixer {} failed: {}", slot, fixer_id, e);
                self.fail(Some(form_context), &e);
                Err(e)
            }
        }
    }

    // ==============================================================================
    // EDIT / CANCEL
    // ==============================================================================

    /// Resolves the booked appointment at `key` and opens it for editing.
    #[instrument(skip(self))]
    pub async fn open_edit(&mut self, key: SlotKey) -> Result<Appointment, SchedulingError> {
        self.ensure_can_open()?;
        self.transition(WorkflowState::LoadingExisting { key });

        let lookup = call_with_timeout(self.settings.request_timeout, self.backend.get_appointment_by_slot(key)).await;
        match lookup {
            Ok(Some(appointment)) => {
                self.transition(WorkflowState::Editing { appointment: appointment.clone() });
                Ok(appointment)
            }
            Ok(None) => {
                debug!("No booked appointment at {} for fixer {}", key.slot, key.fixer_id);
                self.fail(None, &SchedulingError::NotFound);
                Err(SchedulingError::NotFound)
            }
            Err(e) => {
                warn!("Appointment lookup at {} failed: {}", key.slot, e);
                self.fail(None, &e);
                Err(e)
            }
        }
    }

    fn editing(&self) -> Result<Appointment, SchedulingError> {
        match self.state().form() {
            Some(FormContext::Edit { appointment }) => Ok(appointment),
            _ => Err(self.wrong_state()),
        }
    }

    #[instrument(skip(self, form))]
    pub async fn submit_edit(&mut self, form: &BookingForm) -> Result<Appointment, SchedulingError> {
        let original = self.editing()?;
        self.draft_validator.cancel();
        let details = validate_booking_form(form).map_err(SchedulingError::Validation)?;

        self.transition(WorkflowState::Submitting { operation: Operation::Edit });
        let update = AppointmentUpdate::details(details.clone());

        let result = call_with_timeout(
            self.settings.request_timeout,
            self.backend.update_appointment(original.id, update),
        )
        .await
        .and_then(|outcome| {
            let mut fallback = original.clone();
            fallback.details = details;
            applied(outcome, fallback)
        });

        match result {
            Ok(appointment) => {
                info!("Updated appointment {}", appointment.id);
                self.transition(WorkflowState::Done {
                    outcome: BookingOutcome::Updated { appointment: appointment.clone() },
                });
                Ok(appointment)
            }
            Err(e) => {
                warn!("Update of appointment {} failed: {}", original.id, e);
                self.fail(Some(FormContext::Edit { appointment: original }), &e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn cancel(&mut self, reason: Option<String>) -> Result<Appointment, SchedulingError> {
        let original = self.editing()?;
        self.lifecycle.validate_state_transition(original.schedule_state, ScheduleState::Cancelled)?;

        self.transition(WorkflowState::Submitting { operation: Operation::Cancel });

        match self.cancel_original(&original, reason).await {
            Ok(cancelled) => {
                info!("Cancelled appointment {}", cancelled.id);
                self.transition(WorkflowState::Done {
                    outcome: BookingOutcome::Cancelled { appointment: cancelled.clone() },
                });
                Ok(cancelled)
            }
            Err(e) => {
                warn!("Cancellation of appointment {} failed: {}", original.id, e);
                self.fail(Some(FormContext::Edit { appointment: original }), &e);
                Err(e)
            }
        }
    }

    async fn cancel_original(&self, original: &Appointment, reason: Option<String>) -> Result<Appointment, SchedulingError> {
        let outcome = call_with_timeout(
            self.settings.request_timeout,
            self.backend.update_appointment(original.id, AppointmentUpdate::cancellation(reason.clone())),
        )
        .await?;

        let mut fallback = original.clone();
        fallback.schedule_state = ScheduleState::Cancelled;
        fallback.reschedule_reason = reason;
        let cancelled = applied(outcome, fallback)?;

        self.reflect_open(original.fixer_id, self.settings.clock.decode(original.start_time)).await;
        Ok(cancelled)
    }

    // ==============================================================================
    // RESCHEDULE
    // ==============================================================================

    /// Cancels the appointment being edited, then books `new_slot` with the
    /// submitted form. A target already booked is refused before anything is
    /// cancelled. When the cancellation committed but the booking did not,
    /// the workflow parks in `RescheduleIncomplete`;
    /// [`BookingWorkflow::retry_reschedule`] repeats only the booking and
    /// [`BookingWorkflow::retry_reschedule_at`] moves it to another slot.
    #[instrument(skip(self, form))]
    pub async fn reschedule(
        &mut self,
        new_slot: Slot,
        form: &BookingForm,
        reason: Option<String>,
    ) -> Result<RescheduleSummary, SchedulingError> {
        let original = self.editing()?;
        let details = validate_booking_form(form).map_err(SchedulingError::Validation)?;

        let previous_slot = self.settings.clock.decode(original.start_time);
        if previous_slot == new_slot {
            return Err(SchedulingError::InvalidSlot(format!(
                "appointment is already scheduled at {}",
                new_slot
            )));
        }
        self.lifecycle.validate_state_transition(original.schedule_state, ScheduleState::Cancelled)?;

        self.transition(WorkflowState::Submitting { operation: Operation::Reschedule });

        if let Err(e) = self.ensure_slot_free(original.fixer_id, new_slot).await {
            warn!("Reschedule of {} to {} refused before cancelling: {}", original.id, new_slot, e);
            self.fail(Some(FormContext::Edit { appointment: original }), &e);
            return Err(e);
        }

        let cancelled = match self.cancel_original(&original, reason).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!("Reschedule of {} aborted, cancellation failed: {}", original.id, e);
                self.fail(Some(FormContext::Edit { appointment: original }), &e);
                return Err(e);
            }
        };
        info!("Reschedule step 1 done: {} cancelled at {}", cancelled.id, previous_slot);

        self.complete_reschedule(PendingReschedule {
            cancelled,
            previous_slot,
            new_slot,
            details,
            attempts: 0,
            last_error: String::new(),
            last_error_retryable: false,
        })
        .await
    }

    fn pending(&self) -> Result<PendingReschedule, SchedulingError> {
        match self.state() {
            WorkflowState::RescheduleIncomplete { pending } => Ok(pending),
            _ => Err(self.wrong_state()),
        }
    }

    /// Repeats the booking half of a partially applied reschedule. Errors
    /// raised while re-verifying the pending record leave it in place.
    #[instrument(skip(self))]
    pub async fn retry_reschedule(&mut self) -> Result<RescheduleSummary, SchedulingError> {
        let pending = self.verify_pending(self.pending()?).await?;

        self.transition(WorkflowState::Submitting { operation: Operation::Reschedule });
        self.complete_reschedule(pending).await
    }

    /// Finishes a partially applied reschedule on a different slot, for when
    /// the original target was refused outright, e.g. taken meanwhile.
    /// Not allowed after a retryable failure, which may still have booked
    /// the original target.
    #[instrument(skip(self))]
    pub async fn retry_reschedule_at(&mut self, new_slot: Slot) -> Result<RescheduleSummary, SchedulingError> {
        let pending = self.pending()?;
        if new_slot == pending.new_slot {
            return self.retry_reschedule().await;
        }
        if pending.last_error_retryable {
            return Err(SchedulingError::InvalidSlot(format!(
                "the last attempt at {} may have been booked; retry it before choosing another slot",
                pending.new_slot
            )));
        }

        let mut pending = self.verify_pending(pending).await?;
        let earlier_target = SlotKey {
            fixer_id: pending.cancelled.fixer_id,
            requester_id: pending.cancelled.requester_id,
            slot: pending.new_slot,
        };
        let landed = call_with_timeout(
            self.settings.request_timeout,
            self.backend.get_appointment_by_slot(earlier_target),
        )
        .await?
        .filter(Appointment::is_active);
        if let Some(existing) = landed {
            return Err(SchedulingError::InvalidSlot(format!(
                "appointment {} already holds {}",
                existing.id, pending.new_slot
            )));
        }
        self.ensure_slot_free(pending.cancelled.fixer_id, new_slot).await?;

        info!(
            "Moving unfinished reschedule of {} from {} to {}",
            pending.cancelled.id, pending.new_slot, new_slot
        );
        pending.new_slot = new_slot;
        self.transition(WorkflowState::Submitting { operation: Operation::Reschedule });
        self.complete_reschedule(pending).await
    }

    /// A pending record may come from a client, so before booking from it
    /// the details are validated again and the original is re-read; it must
    /// be cancelled. Identity and the previous slot come from the stored row.
    async fn verify_pending(&self, pending: PendingReschedule) -> Result<PendingReschedule, SchedulingError> {
        let details = validate_booking_form(&BookingForm::from_details(&pending.details))
            .map_err(SchedulingError::Validation)?;

        let stored = call_with_timeout(
            self.settings.request_timeout,
            self.backend.get_appointment(pending.cancelled.id),
        )
        .await?
        .ok_or(SchedulingError::NotFound)?;

        if stored.schedule_state != ScheduleState::Cancelled {
            warn!(
                "Refusing to finish reschedule of {}: it is still {}",
                stored.id, stored.schedule_state
            );
            return Err(SchedulingError::OriginalNotCancelled(stored.id));
        }

        Ok(PendingReschedule {
            previous_slot: self.settings.clock.decode(stored.start_time),
            cancelled: stored,
            details,
            ..pending
        })
    }

    async fn ensure_slot_free(&self, fixer_id: Uuid, slot: Slot) -> Result<(), SchedulingError> {
        let snapshot = self.index.current(fixer_id, slot.date()).await?;
        if snapshot.booked_hours.contains(&slot.hour()) {
            return Err(SchedulingError::SlotTaken(slot));
        }
        Ok(())
    }

    async fn complete_reschedule(&self, mut pending: PendingReschedule) -> Result<RescheduleSummary, SchedulingError> {
        let attempts = self.settings.reschedule_create_attempts.max(1);
        let new = NewAppointment {
            fixer_id: pending.cancelled.fixer_id,
            requester_id: pending.cancelled.requester_id,
            slot: pending.new_slot,
            details: pending.details.clone(),
        };

        for attempt in 1..=attempts {
            pending.attempts += 1;
            match self.create_or_adopt(new.clone()).await {
                Ok(created) => {
                    info!(
                        "Rescheduled {} from {} to {} as {}",
                        pending.cancelled.id, pending.previous_slot, pending.new_slot, created.id
                    );
                    self.index.refresh_visible(new.fixer_id).await;
                    self.reflect_booked(new.fixer_id, new.slot).await;

                    let summary = RescheduleSummary {
                        cancelled: pending.cancelled,
                        created,
                        previous_slot: pending.previous_slot,
                        new_slot: pending.new_slot,
                    };
                    self.transition(WorkflowState::Done {
                        outcome: BookingOutcome::Rescheduled { summary: summary.clone() },
                    });
                    return Ok(summary);
                }
                Err(e) => {
                    warn!(
                        "Reschedule booking attempt {}/{} at {} failed: {}",
                        attempt, attempts, pending.new_slot, e
                    );
                    let retryable = e.is_retryable();
                    pending.last_error = e.to_string();
                    pending.last_error_retryable = retryable;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let error = SchedulingError::RescheduleIncomplete {
            original_id: pending.cancelled.id,
            message: pending.last_error.clone(),
        };
        self.transition(WorkflowState::RescheduleIncomplete { pending });
        Err(error)
    }

    /// Books `new` unless a live appointment for the same pair already holds
    /// the slot, which happens when an earlier attempt reached the backend but
    /// its answer was lost.
    async fn create_or_adopt(&self, new: NewAppointment) -> Result<Appointment, SchedulingError> {
        let key = SlotKey {
            fixer_id: new.fixer_id,
            requester_id: new.requester_id,
            slot: new.slot,
        };
        let existing = call_with_timeout(self.settings.request_timeout, self.backend.get_appointment_by_slot(key)).await?;

        if let Some(appointment) = existing.filter(Appointment::is_active) {
            info!("Adopting existing appointment {} at {}", appointment.id, new.slot);
            return Ok(appointment);
        }

        call_with_timeout(self.settings.request_timeout, self.backend.create_appointment(new)).await
    }

    // ==============================================================================
    // AVAILABILITY
    // ==============================================================================

    /// Persists a fixer's hour toggle and mirrors it in the index. Independent
    /// of the booking form state.
    #[instrument(skip(self))]
    pub async fn toggle_hour_disabled(&self, fixer_id: Uuid, slot: Slot, disabled: bool) -> Result<(), SchedulingError> {
        call_with_timeout(
            self.settings.request_timeout,
            self.backend.set_hour_disabled(fixer_id, slot, disabled),
        )
        .await?;

        if !self.index.set_disabled(fixer_id, slot, disabled).await {
            self.index.reload_if_visible(fixer_id, slot.date()).await;
        }
        info!("Fixer {} set {} disabled={}", fixer_id, slot, disabled);
        Ok(())
    }

    // Dates no calendar shows are left alone; the next view loads them fresh.
    async fn reflect_booked(&self, fixer_id: Uuid, slot: Slot) {
        if !self.index.mark_booked(fixer_id, slot).await {
            self.index.reload_if_visible(fixer_id, slot.date()).await;
        }
    }

    async fn reflect_open(&self, fixer_id: Uuid, slot: Slot) {
        if !self.index.mark_open(fixer_id, slot).await {
            self.index.reload_if_visible(fixer_id, slot.date()).await;
        }
    }
}

/// Picks the record the backend echoed back, or the locally applied change
/// when it answered without one.
fn applied(outcome: UpdateOutcome, fallback: Appointment) -> Result<Appointment, SchedulingError> {
    if !outcome.success || outcome.modified_count == 0 {
        return Err(SchedulingError::Rejected {
            status: 409,
            message: format!("appointment {} was not modified", fallback.id),
        });
    }
    Ok(outcome.appointment.unwrap_or(fallback))
}

/// Form prefill for an appointment being edited.
pub fn prefill(appointment: &Appointment) -> BookingForm {
    BookingForm::from_details(&appointment.details)
}
