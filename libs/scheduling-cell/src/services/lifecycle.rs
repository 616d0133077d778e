// libs/scheduling-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::error::SchedulingError;
use crate::models::ScheduleState;

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a state transition is allowed
    pub fn validate_state_transition(
        &self,
        current_state: ScheduleState,
        new_state: ScheduleState,
    ) -> Result<(), SchedulingError> {
        debug!("Validating state transition from {} to {}", current_state, new_state);

        if !self.get_valid_transitions(current_state).contains(&new_state) {
            warn!("Invalid state transition attempted: {} -> {}", current_state, new_state);
            return Err(SchedulingError::InvalidStatusTransition {
                from: current_state,
                to: new_state,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_state: ScheduleState) -> Vec<ScheduleState> {
        match current_state {
            ScheduleState::Booked => vec![
                ScheduleState::Cancelled,
                ScheduleState::Completed,
            ],
            // Terminal states
            ScheduleState::Cancelled => vec![],
            ScheduleState::Completed => vec![],
        }
    }

    pub fn is_terminal(&self, state: ScheduleState) -> bool {
        self.get_valid_transitions(state).is_empty()
    }
}
