pub mod availability;
pub mod backend;
pub mod booking;
pub mod calendar;
pub mod debounce;
pub mod lifecycle;
pub mod slot;
pub mod time_offset;
pub mod validation;

pub use availability::{AvailabilityIndex, AvailabilityLookup, AvailabilityView};
pub use backend::{AppointmentBackend, RestAppointmentBackend};
pub use booking::{BookingWorkflow, WorkflowSettings, WorkflowState};
pub use calendar::CalendarViewController;
pub use debounce::{DebouncedValidator, Debouncer};
pub use lifecycle::AppointmentLifecycleService;
pub use slot::{RequesterOpenSlotDisplay, SlotRenderer};
pub use time_offset::ScheduleClock;
pub use validation::{validate_booking_form, BookingForm, ValidationErrors};
