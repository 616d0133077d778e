#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use scheduling_cell::error::SchedulingError;
use scheduling_cell::models::{
    Appointment, AppointmentDetails, AppointmentUpdate, ModalityDetails, NewAppointment,
    ScheduleState, Slot, SlotKey, UpdateOutcome,
};
use scheduling_cell::services::availability::AvailabilityIndex;
use scheduling_cell::services::backend::AppointmentBackend;
use scheduling_cell::services::booking::{BookingWorkflow, WorkflowSettings};
use scheduling_cell::services::time_offset::ScheduleClock;
use scheduling_cell::services::validation::BookingForm;

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
}

pub fn slot(day: u32, hour: u32) -> Slot {
    Slot::new(date(day), hour).unwrap()
}

pub fn virtual_form() -> BookingForm {
    BookingForm {
        client_name: "María López".to_string(),
        client_contact: "71234567".to_string(),
        description: "Leaking kitchen sink".to_string(),
        modality: ModalityDetails::Virtual {
            meeting_link: "https://meet.google.com/abc-defg-hij".to_string(),
        },
    }
}

pub fn virtual_details() -> AppointmentDetails {
    let form = virtual_form();
    AppointmentDetails {
        client_name: form.client_name,
        client_contact: form.client_contact,
        description: form.description,
        modality: form.modality,
    }
}

/// How the next create call misbehaves.
#[derive(Debug, Clone)]
pub enum CreateFailure {
    Reject(SchedulingError),
    /// The row is stored but the caller sees a timeout.
    CommitThenTimeout,
}

#[derive(Default)]
struct FakeState {
    appointments: Vec<Appointment>,
    disabled: BTreeSet<(Uuid, NaiveDate, u32)>,
    calls: Vec<&'static str>,
    create_failures: VecDeque<CreateFailure>,
    update_failures: VecDeque<SchedulingError>,
    listing_delays: HashMap<NaiveDate, Duration>,
    failing_dates: HashSet<NaiveDate>,
    create_delay: Option<Duration>,
}

/// In-memory appointment service with the same slot semantics as the real
/// one: one live booking per fixer and start time.
pub struct FakeBackend {
    clock: ScheduleClock,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: ScheduleClock::default(),
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn book(&self, fixer_id: Uuid, requester_id: Uuid, slot: Slot) -> Appointment {
        let appointment = self.build(&NewAppointment {
            fixer_id,
            requester_id,
            slot,
            details: virtual_details(),
        });
        self.state.lock().unwrap().appointments.push(appointment.clone());
        appointment
    }

    pub fn disable(&self, fixer_id: Uuid, slot: Slot) {
        self.state.lock().unwrap().disabled.insert((fixer_id, slot.date(), slot.hour()));
    }

    pub fn fail_next_create(&self, failure: CreateFailure) {
        self.state.lock().unwrap().create_failures.push_back(failure);
    }

    pub fn fail_next_update(&self, error: SchedulingError) {
        self.state.lock().unwrap().update_failures.push_back(error);
    }

    pub fn delay_listing(&self, date: NaiveDate, delay: Duration) {
        self.state.lock().unwrap().listing_delays.insert(date, delay);
    }

    pub fn clear_listing_delay(&self, date: NaiveDate) {
        self.state.lock().unwrap().listing_delays.remove(&date);
    }

    pub fn fail_listing(&self, date: NaiveDate) {
        self.state.lock().unwrap().failing_dates.insert(date);
    }

    pub fn delay_creates(&self, delay: Duration) {
        self.state.lock().unwrap().create_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls().into_iter().filter(|c| *c == name).count()
    }

    pub fn appointment(&self, id: Uuid) -> Option<Appointment> {
        self.state.lock().unwrap().appointments.iter().find(|a| a.id == id).cloned()
    }

    /// Live appointments of a fixer at a slot.
    pub fn active_at(&self, fixer_id: Uuid, slot: Slot) -> Vec<Appointment> {
        let start = self.clock.encode(slot);
        self.state.lock().unwrap().appointments.iter()
            .filter(|a| a.fixer_id == fixer_id && a.start_time == start && a.is_active())
            .cloned()
            .collect()
    }

    fn record(&self, call: &'static str) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn build(&self, new: &NewAppointment) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            fixer_id: new.fixer_id,
            requester_id: new.requester_id,
            scheduled_date: new.slot.date(),
            start_time: self.clock.encode(new.slot),
            end_time: self.clock.encode_end(new.slot),
            schedule_state: ScheduleState::Booked,
            details: new.details.clone(),
            reschedule_reason: None,
            created_at: Some(Utc::now()),
            updated_at: None,
        }
    }
}

#[async_trait]
impl AppointmentBackend for FakeBackend {
    async fn get_appointment_by_slot(&self, key: SlotKey) -> Result<Option<Appointment>, SchedulingError> {
        self.record("get_appointment_by_slot");
        let start = self.clock.encode(key.slot);
        Ok(self.state.lock().unwrap().appointments.iter()
            .find(|a| {
                a.fixer_id == key.fixer_id
                    && a.requester_id == key.requester_id
                    && a.start_time == start
                    && a.is_active()
            })
            .cloned())
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, SchedulingError> {
        self.record("get_appointment");
        Ok(self.appointment(id))
    }

    async fn update_appointment(&self, id: Uuid, update: AppointmentUpdate) -> Result<UpdateOutcome, SchedulingError> {
        self.record("update_appointment");
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.update_failures.pop_front() {
            return Err(error);
        }

        let Some(appointment) = state.appointments.iter_mut().find(|a| a.id == id) else {
            return Ok(UpdateOutcome { success: false, modified_count: 0, appointment: None });
        };
        if let Some(schedule_state) = update.schedule_state {
            appointment.schedule_state = schedule_state;
        }
        if update.reschedule_reason.is_some() {
            appointment.reschedule_reason = update.reschedule_reason;
        }
        if let Some(details) = update.details {
            appointment.details = details;
        }
        appointment.updated_at = Some(Utc::now());

        Ok(UpdateOutcome {
            success: true,
            modified_count: 1,
            appointment: Some(appointment.clone()),
        })
    }

    async fn create_appointment(&self, new: NewAppointment) -> Result<Appointment, SchedulingError> {
        self.record("create_appointment");
        let delay = self.state.lock().unwrap().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let commit_then_timeout = match state.create_failures.pop_front() {
            Some(CreateFailure::Reject(error)) => return Err(error),
            Some(CreateFailure::CommitThenTimeout) => true,
            None => false,
        };

        let start = self.clock.encode(new.slot);
        let taken = state.appointments.iter()
            .any(|a| a.fixer_id == new.fixer_id && a.start_time == start && a.is_active());
        if taken {
            return Err(SchedulingError::Rejected { status: 409, message: "slot already booked".to_string() });
        }

        let appointment = self.build(&new);
        state.appointments.push(appointment.clone());

        if commit_then_timeout {
            return Err(SchedulingError::Timeout);
        }
        Ok(appointment)
    }

    async fn list_booked_appointments(&self, fixer_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        self.record("list_booked_appointments");
        let (rows, delay) = {
            let state = self.state.lock().unwrap();
            if state.failing_dates.contains(&date) {
                return Err(SchedulingError::Backend("listing unavailable".to_string()));
            }
            let rows: Vec<Appointment> = state.appointments.iter()
                .filter(|a| a.fixer_id == fixer_id && a.scheduled_date == date && a.is_active())
                .cloned()
                .collect();
            (rows, state.listing_delays.get(&date).copied())
        };

        // Rows are read before the delay so a slow response carries old data.
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn list_disabled_hours(&self, fixer_id: Uuid, date: NaiveDate) -> Result<Vec<u32>, SchedulingError> {
        self.record("list_disabled_hours");
        Ok(self.state.lock().unwrap().disabled.iter()
            .filter(|(f, d, _)| *f == fixer_id && *d == date)
            .map(|(_, _, hour)| *hour)
            .collect())
    }

    async fn set_hour_disabled(&self, fixer_id: Uuid, slot: Slot, disabled: bool) -> Result<(), SchedulingError> {
        self.record("set_hour_disabled");
        let mut state = self.state.lock().unwrap();
        let key = (fixer_id, slot.date(), slot.hour());
        if disabled {
            state.disabled.insert(key);
        } else {
            state.disabled.remove(&key);
        }
        Ok(())
    }
}

pub fn index_for(backend: &Arc<FakeBackend>) -> Arc<AvailabilityIndex> {
    let backend: Arc<dyn AppointmentBackend> = backend.clone();
    Arc::new(AvailabilityIndex::new(backend, ScheduleClock::default(), Duration::from_secs(1)))
}

pub fn workflow_for(backend: &Arc<FakeBackend>, index: &Arc<AvailabilityIndex>, attempts: u32) -> BookingWorkflow {
    let backend: Arc<dyn AppointmentBackend> = backend.clone();
    BookingWorkflow::new(
        backend,
        Arc::clone(index),
        WorkflowSettings {
            request_timeout: Duration::from_secs(1),
            reschedule_create_attempts: attempts,
            ..WorkflowSettings::default()
        },
    )
}
