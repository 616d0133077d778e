use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;

pub struct TestConfig {
    pub backend_url: String,
    pub backend_anon_key: String,
    pub request_timeout_secs: u64,
    pub reschedule_create_attempts: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            backend_anon_key: "test-anon-key".to_string(),
            request_timeout_secs: 2,
            reschedule_create_attempts: 2,
        }
    }
}

impl TestConfig {
    /// Points the config at a mock server.
    pub fn with_backend(url: &str) -> Self {
        Self {
            backend_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            backend_url: self.backend_url.clone(),
            backend_anon_key: self.backend_anon_key.clone(),
            request_timeout_secs: self.request_timeout_secs,
            reschedule_create_attempts: self.reschedule_create_attempts,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct MockBackendResponses;

impl MockBackendResponses {
    /// A booked virtual appointment row. `start_time` is the stored UTC
    /// timestamp, e.g. "2025-03-10T18:00:00Z" for a 14:00 slot.
    pub fn appointment_response(id: Uuid, fixer_id: Uuid, requester_id: Uuid, date: &str, start_time: &str) -> Value {
        json!({
            "id": id,
            "fixer_id": fixer_id,
            "requester_id": requester_id,
            "scheduled_date": date,
            "start_time": start_time,
            "end_time": Self::one_hour_after(start_time),
            "schedule_state": "booked",
            "modality": "virtual",
            "meeting_link": "https://meet.google.com/abc-defg-hij",
            "location_lat": null,
            "location_lon": null,
            "location_address": null,
            "client_name": "María López",
            "client_contact": "71234567",
            "description": "Leaking kitchen sink",
            "reschedule_reason": null,
            "created_at": "2025-03-01T12:00:00Z",
            "updated_at": "2025-03-01T12:00:00Z"
        })
    }

    pub fn presential_appointment_response(id: Uuid, fixer_id: Uuid, requester_id: Uuid, date: &str, start_time: &str) -> Value {
        let mut row = Self::appointment_response(id, fixer_id, requester_id, date, start_time);
        row["modality"] = json!("presential");
        row["meeting_link"] = Value::Null;
        row["location_lat"] = json!(-17.3935);
        row["location_lon"] = json!(-66.157);
        row["location_address"] = json!("Av. Ballivián 555");
        row
    }

    pub fn cancelled(mut row: Value, reason: Option<&str>) -> Value {
        row["schedule_state"] = json!("cancelled");
        row["reschedule_reason"] = json!(reason);
        row
    }

    pub fn disabled_hour_response(fixer_id: Uuid, date: &str, hour: u32) -> Value {
        json!({
            "fixer_id": fixer_id,
            "date": date,
            "hour": hour
        })
    }

    pub fn error_response(message: &str, code: &str) -> Value {
        json!({
            "message": message,
            "code": code,
            "details": null,
            "hint": null
        })
    }

    fn one_hour_after(timestamp: &str) -> Value {
        DateTime::parse_from_rfc3339(timestamp)
            .map(|t| json!((t + Duration::hours(1)).with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)))
            .unwrap_or(Value::Null)
    }
}
