use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend_url: String,
    pub backend_anon_key: String,
    pub request_timeout_secs: u64,
    pub schedule_utc_offset_hours: i32,
    pub reschedule_create_attempts: u32,
    pub validation_debounce_ms: u64,
    pub requester_open_slots_bookable: bool,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            backend_anon_key: String::new(),
            request_timeout_secs: 10,
            schedule_utc_offset_hours: -4,
            reschedule_create_attempts: 2,
            validation_debounce_ms: 300,
            requester_open_slots_bookable: false,
            port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| {
                    warn!("BACKEND_URL not set, using empty value");
                    String::new()
                }),
            backend_anon_key: env::var("BACKEND_ANON_KEY")
                .unwrap_or_else(|_| {
                    warn!("BACKEND_ANON_KEY not set, using empty value");
                    String::new()
                }),
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            schedule_utc_offset_hours: parse_var("SCHEDULE_UTC_OFFSET_HOURS", defaults.schedule_utc_offset_hours),
            reschedule_create_attempts: parse_var("RESCHEDULE_CREATE_ATTEMPTS", defaults.reschedule_create_attempts),
            validation_debounce_ms: parse_var("VALIDATION_DEBOUNCE_MS", defaults.validation_debounce_ms),
            requester_open_slots_bookable: match env::var("REQUESTER_OPEN_SLOTS").as_deref() {
                Ok("bookable") => true,
                Ok("unavailable") | Err(_) => false,
                Ok(other) => {
                    warn!("REQUESTER_OPEN_SLOTS has unknown value '{}', using 'unavailable'", other);
                    false
                }
            },
            port: parse_var("PORT", defaults.port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.backend_url.is_empty() && !self.backend_anon_key.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validation_debounce(&self) -> Duration {
        Duration::from_millis(self.validation_debounce_ms)
    }
}

fn parse_var<T: std::str::FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_fixed_backend_offset() {
        let config = AppConfig::default();
        assert_eq!(config.schedule_utc_offset_hours, -4);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(!config.is_configured());
    }
}
