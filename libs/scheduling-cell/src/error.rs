use serde_json::json;
use shared_models::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ScheduleState, Slot};
use crate::services::validation::ValidationErrors;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulingError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Slot {0} is already booked")]
    SlotTaken(Slot),

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition { from: ScheduleState, to: ScheduleState },

    #[error("Operation not allowed while the booking workflow is {0}")]
    InvalidWorkflowState(String),

    #[error("Backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend did not answer within the request timeout")]
    Timeout,

    #[error("Malformed appointment record: {0}")]
    MalformedRecord(String),

    #[error("Appointment {0} is not cancelled, so there is no reschedule to finish")]
    OriginalNotCancelled(Uuid),

    #[error("Appointment {original_id} was cancelled but the replacement booking failed: {message}")]
    RescheduleIncomplete { original_id: Uuid, message: String },
}

impl SchedulingError {
    /// Failures worth retrying unchanged: timeouts and upstream outages.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulingError::Timeout | SchedulingError::Backend(_) => true,
            SchedulingError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for SchedulingError {
    fn from(err: anyhow::Error) -> Self {
        if shared_database::is_timeout(&err) {
            return SchedulingError::Timeout;
        }
        match err.downcast_ref::<shared_database::ApiStatusError>() {
            Some(status_err) if status_err.status == 404 => SchedulingError::NotFound,
            Some(status_err) => SchedulingError::Rejected {
                status: status_err.status,
                message: status_err.body.clone(),
            },
            None => SchedulingError::Backend(err.to_string()),
        }
    }
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::NotFound => AppError::NotFound("Appointment not found".to_string()),
            SchedulingError::InvalidSlot(msg) => AppError::BadRequest(msg),
            SchedulingError::Validation(errors) => AppError::ValidationError(json!(errors.errors())),
            e @ (SchedulingError::InvalidStatusTransition { .. }
            | SchedulingError::InvalidWorkflowState(_)
            | SchedulingError::SlotTaken(_)
            | SchedulingError::OriginalNotCancelled(_)) => {
                AppError::Conflict(e.to_string())
            }
            SchedulingError::Rejected { status: 409, message } => AppError::Conflict(message),
            SchedulingError::Rejected { status, message } if status < 500 => AppError::BadRequest(message),
            e @ (SchedulingError::Rejected { .. } | SchedulingError::Backend(_) | SchedulingError::MalformedRecord(_)) => {
                AppError::ExternalService(e.to_string())
            }
            e @ SchedulingError::Timeout => AppError::Timeout(e.to_string()),
            e @ SchedulingError::RescheduleIncomplete { original_id, .. } => AppError::PartialFailure(json!({
                "error": e.to_string(),
                "stage": "reschedule_incomplete",
                "original_id": original_id,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_server_errors_are_retryable() {
        assert!(SchedulingError::Timeout.is_retryable());
        assert!(SchedulingError::Rejected { status: 503, message: "down".into() }.is_retryable());
        assert!(!SchedulingError::Rejected { status: 409, message: "slot taken".into() }.is_retryable());
        assert!(!SchedulingError::NotFound.is_retryable());
    }

    #[test]
    fn validation_errors_become_field_lists() {
        let mut errors = ValidationErrors::default();
        errors.push(crate::services::validation::FormField::ClientContact, "bad contact");

        match AppError::from(SchedulingError::Validation(errors)) {
            AppError::ValidationError(fields) => {
                assert_eq!(fields[0]["field"], "client_contact");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn taken_slot_is_a_conflict() {
        let slot = Slot::new(chrono::NaiveDate::from_ymd_opt(2025, 3, 12).unwrap(), 9).unwrap();

        assert!(!SchedulingError::SlotTaken(slot).is_retryable());
        assert!(matches!(AppError::from(SchedulingError::SlotTaken(slot)), AppError::Conflict(_)));
        assert!(matches!(
            AppError::from(SchedulingError::OriginalNotCancelled(Uuid::new_v4())),
            AppError::Conflict(_)
        ));
    }

    #[test]
    fn status_errors_map_to_rejections() {
        let err: anyhow::Error = shared_database::ApiStatusError {
            status: 409,
            body: "duplicate".to_string(),
        }.into();

        assert_eq!(
            SchedulingError::from(err),
            SchedulingError::Rejected { status: 409, message: "duplicate".to_string() }
        );
    }
}
