// libs/scheduling-cell/src/models.rs
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulingError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub schedule_state: ScheduleState,
    #[serde(flatten)]
    pub details: AppointmentDetails,
    pub reschedule_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn modality(&self) -> Modality {
        self.details.modality.modality()
    }

    pub fn is_active(&self) -> bool {
        self.schedule_state == ScheduleState::Booked
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Booked,
    Cancelled,
    Completed,
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleState::Booked => write!(f, "booked"),
            ScheduleState::Cancelled => write!(f, "cancelled"),
            ScheduleState::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for ScheduleState {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(ScheduleState::Booked),
            "cancelled" => Ok(ScheduleState::Cancelled),
            "completed" => Ok(ScheduleState::Completed),
            other => Err(SchedulingError::MalformedRecord(format!("unknown schedule state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Virtual,
    Presential,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Virtual => write!(f, "virtual"),
            Modality::Presential => write!(f, "presential"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub address: String,
}

/// Modality plus the one field that modality requires. A virtual appointment
/// cannot carry a location and a presential one cannot carry a meeting link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum ModalityDetails {
    Virtual { meeting_link: String },
    Presential { location: Location },
}

impl ModalityDetails {
    pub fn modality(&self) -> Modality {
        match self {
            ModalityDetails::Virtual { .. } => Modality::Virtual,
            ModalityDetails::Presential { .. } => Modality::Presential,
        }
    }
}

/// Client-supplied fields captured at booking time. Only produced by
/// `validation::validate_booking_form` (or decoded from backend records), so
/// anything holding one has passed validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentDetails {
    pub client_name: String,
    pub client_contact: String,
    pub description: String,
    #[serde(flatten)]
    pub modality: ModalityDetails,
}

// ==============================================================================
// SLOTS AND ROLES
// ==============================================================================

/// One (date, hour) cell of the calendar, in schedule wall-clock time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "SlotParts")]
pub struct Slot {
    date: NaiveDate,
    hour: u32,
}

#[derive(Deserialize)]
struct SlotParts {
    date: NaiveDate,
    hour: u32,
}

impl TryFrom<SlotParts> for Slot {
    type Error = SchedulingError;

    fn try_from(parts: SlotParts) -> Result<Self, Self::Error> {
        Slot::new(parts.date, parts.hour)
    }
}

impl Slot {
    pub const HOURS_PER_DAY: u32 = 24;

    pub fn new(date: NaiveDate, hour: u32) -> Result<Self, SchedulingError> {
        if hour >= Self::HOURS_PER_DAY {
            return Err(SchedulingError::InvalidSlot(format!("hour {} is outside 0..=23", hour)));
        }
        Ok(Self { date, hour })
    }

    /// The slot whose hour contains `local` (minutes and seconds are dropped).
    pub fn containing(local: NaiveDateTime) -> Self {
        Self {
            date: local.date(),
            hour: local.hour(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{:02}:00", self.date.format("%Y-%m-%d"), self.hour)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Fixer,
    Requester,
}

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilitySnapshot {
    pub fixer_id: Uuid,
    pub date: NaiveDate,
    pub booked_hours: BTreeSet<u32>,
    pub disabled_hours: BTreeSet<u32>,
    /// Set when the load failed and the snapshot is the fail-open placeholder.
    pub load_failed: bool,
}

impl AvailabilitySnapshot {
    pub fn empty(fixer_id: Uuid, date: NaiveDate) -> Self {
        Self {
            fixer_id,
            date,
            booked_hours: BTreeSet::new(),
            disabled_hours: BTreeSet::new(),
            load_failed: false,
        }
    }

    pub fn failed(fixer_id: Uuid, date: NaiveDate) -> Self {
        Self {
            load_failed: true,
            ..Self::empty(fixer_id, date)
        }
    }
}

// ==============================================================================
// CALENDAR VIEW MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Month,
    #[default]
    Week,
    Day,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Month => write!(f, "month"),
            Granularity::Week => write!(f, "week"),
            Granularity::Day => write!(f, "day"),
        }
    }
}

impl FromStr for Granularity {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "month" => Ok(Granularity::Month),
            "week" => Ok(Granularity::Week),
            "day" => Ok(Granularity::Day),
            other => Err(SchedulingError::InvalidSlot(format!("unknown granularity '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Back,
    Forward,
}

// ==============================================================================
// SLOT RENDERING MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Past,
    AvailableForOverride,
    Occupied,
    Open,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlotAction {
    None,
    CreateAppointment { slot: Slot, start_time: DateTime<Utc> },
    EditAppointment { slot: Slot },
    ManageAvailability { slot: Slot, disabled: bool, booked: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotView {
    pub date: NaiveDate,
    pub hour: u32,
    pub status: SlotStatus,
    pub label: Option<String>,
    pub color_class: Option<String>,
    pub action: SlotAction,
    pub is_today: bool,
}

impl SlotView {
    pub fn is_clickable(&self) -> bool {
        self.action != SlotAction::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub is_today: bool,
    pub in_anchor_month: bool,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarResponse {
    pub fixer_id: Uuid,
    pub granularity: Granularity,
    pub anchor_date: NaiveDate,
    pub days: Vec<DayView>,
}

// ==============================================================================
// BACKEND REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub slot: Slot,
    pub details: AppointmentDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppointmentUpdate {
    pub schedule_state: Option<ScheduleState>,
    pub reschedule_reason: Option<String>,
    pub details: Option<AppointmentDetails>,
}

impl AppointmentUpdate {
    pub fn cancellation(reason: Option<String>) -> Self {
        Self {
            schedule_state: Some(ScheduleState::Cancelled),
            reschedule_reason: reason,
            details: None,
        }
    }

    pub fn details(details: AppointmentDetails) -> Self {
        Self {
            details: Some(details),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub modified_count: usize,
    pub appointment: Option<Appointment>,
}

/// Composite key the backend offers for resolving a booked slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotKey {
    pub fixer_id: Uuid,
    pub requester_id: Uuid,
    pub slot: Slot,
}

// ==============================================================================
// WORKFLOW MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduleSummary {
    pub cancelled: Appointment,
    pub created: Appointment,
    pub previous_slot: Slot,
    pub new_slot: Slot,
}

/// State left behind when the cancellation committed but the replacement
/// booking did not. Carries everything needed to retry only the second step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingReschedule {
    pub cancelled: Appointment,
    pub previous_slot: Slot,
    pub new_slot: Slot,
    pub details: AppointmentDetails,
    pub attempts: u32,
    pub last_error: String,
    /// A retryable failure may still have landed, so the target slot stays fixed.
    #[serde(default)]
    pub last_error_retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingOutcome {
    Created { appointment: Appointment },
    Updated { appointment: Appointment },
    Cancelled { appointment: Appointment },
    Rescheduled { summary: RescheduleSummary },
}
