// libs/scheduling-cell/src/services/debounce.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use shared_config::AppConfig;

use crate::models::AppointmentDetails;
use crate::services::validation::{validate_booking_form, BookingForm, ValidationErrors};

/// Trailing-edge debounce: of a burst of calls arriving within `delay` of
/// each other, only the last one resolves to `Some`.
pub struct Debouncer {
    delay: Duration,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn debounce<T>(&self, value: T) -> Option<T> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        if self.generation.load(Ordering::SeqCst) == ticket {
            Some(value)
        } else {
            debug!("Debounced call {} superseded", ticket);
            None
        }
    }

    /// Drops whatever call is currently waiting.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Runs form validation only once input has settled.
pub struct DebouncedValidator {
    debouncer: Debouncer,
}

impl DebouncedValidator {
    pub fn new(delay: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(delay),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.validation_debounce())
    }

    /// `None` when a newer form arrived during the quiet period.
    pub async fn validate(&self, form: BookingForm) -> Option<Result<AppointmentDetails, ValidationErrors>> {
        let form = self.debouncer.debounce(form).await?;
        Some(validate_booking_form(&form))
    }

    pub fn cancel(&self) {
        self.debouncer.cancel();
    }
}
