// libs/scheduling-cell/src/services/backend.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::BackendClient;

use crate::error::SchedulingError;
use crate::models::{
    Appointment, AppointmentDetails, AppointmentUpdate, Location, Modality, ModalityDetails,
    NewAppointment, ScheduleState, Slot, SlotKey, UpdateOutcome,
};
use crate::services::time_offset::{to_wire_date, to_wire_timestamp, ScheduleClock};

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
const DISABLED_HOURS_PATH: &str = "/rest/v1/fixer_disabled_hours";

/// Contract of the appointment service this subsystem consumes. It owns
/// persistence and conflict detection; callers only read and mutate records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppointmentBackend: Send + Sync {
    /// Resolves the booked appointment at a slot; the backend has no lookup by id from the grid.
    async fn get_appointment_by_slot(&self, key: SlotKey) -> Result<Option<Appointment>, SchedulingError>;

    /// Reads one record in any state.
    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, SchedulingError>;

    async fn update_appointment(&self, id: Uuid, update: AppointmentUpdate) -> Result<UpdateOutcome, SchedulingError>;

    async fn create_appointment(&self, new: NewAppointment) -> Result<Appointment, SchedulingError>;

    async fn list_booked_appointments(&self, fixer_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError>;

    async fn list_disabled_hours(&self, fixer_id: Uuid, date: NaiveDate) -> Result<Vec<u32>, SchedulingError>;

    async fn set_hour_disabled(&self, fixer_id: Uuid, slot: Slot, disabled: bool) -> Result<(), SchedulingError>;
}

/// Bounds a backend call; running out of time is a retryable failure.
pub async fn call_with_timeout<T, F>(limit: Duration, call: F) -> Result<T, SchedulingError>
where
    F: Future<Output = Result<T, SchedulingError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| SchedulingError::Timeout)?
}

// ==============================================================================
// WIRE RECORDS
// ==============================================================================

/// Flat row shape stored by the backend.
#[derive(Debug, Deserialize)]
struct AppointmentRecord {
    id: Uuid,
    fixer_id: Uuid,
    requester_id: Uuid,
    scheduled_date: NaiveDate,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    schedule_state: ScheduleState,
    modality: Modality,
    meeting_link: Option<String>,
    location_lat: Option<f64>,
    location_lon: Option<f64>,
    location_address: Option<String>,
    client_name: String,
    client_contact: String,
    description: String,
    #[serde(default)]
    reschedule_reason: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<AppointmentRecord> for Appointment {
    type Error = SchedulingError;

    fn try_from(record: AppointmentRecord) -> Result<Self, Self::Error> {
        let modality = match record.modality {
            Modality::Virtual => ModalityDetails::Virtual {
                meeting_link: record.meeting_link.ok_or_else(|| {
                    SchedulingError::MalformedRecord(format!("virtual appointment {} has no meeting link", record.id))
                })?,
            },
            Modality::Presential => match (record.location_lat, record.location_lon, record.location_address) {
                (Some(lat), Some(lon), Some(address)) => ModalityDetails::Presential {
                    location: Location { lat, lon, address },
                },
                _ => {
                    return Err(SchedulingError::MalformedRecord(format!(
                        "presential appointment {} has an incomplete location",
                        record.id
                    )))
                }
            },
        };

        Ok(Appointment {
            id: record.id,
            fixer_id: record.fixer_id,
            requester_id: record.requester_id,
            scheduled_date: record.scheduled_date,
            start_time: record.start_time,
            end_time: record.end_time,
            schedule_state: record.schedule_state,
            details: AppointmentDetails {
                client_name: record.client_name,
                client_contact: record.client_contact,
                description: record.description,
                modality,
            },
            reschedule_reason: record.reschedule_reason,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn parse_appointment(value: Value) -> Result<Appointment, SchedulingError> {
    let record: AppointmentRecord = serde_json::from_value(value)
        .map_err(|e| SchedulingError::MalformedRecord(format!("Failed to parse appointment: {}", e)))?;
    Appointment::try_from(record)
}

/// Inserts the client fields and exactly one modality branch.
fn insert_details(body: &mut Map<String, Value>, details: &AppointmentDetails) {
    body.insert("client_name".to_string(), json!(details.client_name));
    body.insert("client_contact".to_string(), json!(details.client_contact));
    body.insert("description".to_string(), json!(details.description));
    body.insert("modality".to_string(), json!(details.modality.modality().to_string()));

    match &details.modality {
        ModalityDetails::Virtual { meeting_link } => {
            body.insert("meeting_link".to_string(), json!(meeting_link));
        }
        ModalityDetails::Presential { location } => {
            body.insert("location_lat".to_string(), json!(location.lat));
            body.insert("location_lon".to_string(), json!(location.lon));
            body.insert("location_address".to_string(), json!(location.address));
        }
    }
}

/// Create payload. Times go through the schedule clock so the backend
/// receives its fixed-offset representation.
pub fn create_payload(new: &NewAppointment, clock: &ScheduleClock) -> Value {
    let mut body = Map::new();
    body.insert("fixer_id".to_string(), json!(new.fixer_id));
    body.insert("requester_id".to_string(), json!(new.requester_id));
    body.insert("scheduled_date".to_string(), json!(to_wire_date(new.slot.date())));
    body.insert("start_time".to_string(), json!(to_wire_timestamp(clock.encode(new.slot))));
    body.insert("end_time".to_string(), json!(to_wire_timestamp(clock.encode_end(new.slot))));
    body.insert("schedule_state".to_string(), json!(ScheduleState::Booked.to_string()));
    insert_details(&mut body, &new.details);
    Value::Object(body)
}

/// Update payload. When the details change modality the stale branch is
/// cleared so the stored row stays exclusive.
pub fn update_payload(update: &AppointmentUpdate) -> Value {
    let mut body = Map::new();

    if let Some(state) = update.schedule_state {
        body.insert("schedule_state".to_string(), json!(state.to_string()));
    }
    if let Some(reason) = &update.reschedule_reason {
        body.insert("reschedule_reason".to_string(), json!(reason));
    }
    if let Some(details) = &update.details {
        insert_details(&mut body, details);
        match details.modality {
            ModalityDetails::Virtual { .. } => {
                body.insert("location_lat".to_string(), Value::Null);
                body.insert("location_lon".to_string(), Value::Null);
                body.insert("location_address".to_string(), Value::Null);
            }
            ModalityDetails::Presential { .. } => {
                body.insert("meeting_link".to_string(), Value::Null);
            }
        }
    }

    body.insert("updated_at".to_string(), json!(to_wire_timestamp(Utc::now())));
    Value::Object(body)
}

fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

// ==============================================================================
// REST IMPLEMENTATION
// ==============================================================================

pub struct RestAppointmentBackend {
    client: Arc<BackendClient>,
    clock: ScheduleClock,
    auth_token: Option<String>,
}

impl RestAppointmentBackend {
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self {
            client: Arc::new(BackendClient::new(config)),
            clock: ScheduleClock::from_config(config),
            auth_token,
        }
    }

    pub fn with_client(client: Arc<BackendClient>, clock: ScheduleClock, auth_token: Option<String>) -> Self {
        Self {
            client,
            clock,
            auth_token,
        }
    }

    fn token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}

#[async_trait]
impl AppointmentBackend for RestAppointmentBackend {
    #[instrument(skip(self))]
    async fn get_appointment_by_slot(&self, key: SlotKey) -> Result<Option<Appointment>, SchedulingError> {
        let start = to_wire_timestamp(self.clock.encode(key.slot));
        let path = format!(
            "{}?fixer_id=eq.{}&requester_id=eq.{}&scheduled_date=eq.{}&start_time=eq.{}&schedule_state=eq.booked",
            APPOINTMENTS_PATH,
            key.fixer_id,
            key.requester_id,
            to_wire_date(key.slot.date()),
            urlencoding::encode(&start),
        );

        let result: Vec<Value> = self.client.request(Method::GET, &path, self.token(), None).await?;

        match result.into_iter().next() {
            Some(row) => Ok(Some(parse_appointment(row)?)),
            None => {
                debug!("No booked appointment at {}", key.slot);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, id);

        let result: Vec<Value> = self.client.request(Method::GET, &path, self.token(), None).await?;

        result.into_iter().next().map(parse_appointment).transpose()
    }

    #[instrument(skip(self, update))]
    async fn update_appointment(&self, id: Uuid, update: AppointmentUpdate) -> Result<UpdateOutcome, SchedulingError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, id);

        let result: Vec<Value> = self.client.request_with_headers(
            Method::PATCH,
            &path,
            self.token(),
            Some(update_payload(&update)),
            Some(return_representation()),
        ).await?;

        let modified_count = result.len();
        let appointment = match result.into_iter().next() {
            Some(row) => Some(parse_appointment(row)?),
            None => None,
        };

        info!("Appointment {} updated ({} row(s))", id, modified_count);

        Ok(UpdateOutcome {
            success: modified_count > 0,
            modified_count,
            appointment,
        })
    }

    #[instrument(skip(self, new), fields(slot = %new.slot))]
    async fn create_appointment(&self, new: NewAppointment) -> Result<Appointment, SchedulingError> {
        let result: Vec<Value> = self.client.request_with_headers(
            Method::POST,
            APPOINTMENTS_PATH,
            self.token(),
            Some(create_payload(&new, &self.clock)),
            Some(return_representation()),
        ).await?;

        let row = result.into_iter().next().ok_or_else(|| {
            SchedulingError::Backend("Failed to create appointment: empty response".to_string())
        })?;
        let appointment = parse_appointment(row)?;

        info!("Appointment {} created at {}", appointment.id, new.slot);
        Ok(appointment)
    }

    async fn list_booked_appointments(&self, fixer_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "{}?fixer_id=eq.{}&scheduled_date=eq.{}&schedule_state=eq.booked",
            APPOINTMENTS_PATH,
            fixer_id,
            to_wire_date(date),
        );

        let result: Vec<Value> = self.client.request(Method::GET, &path, self.token(), None).await?;

        result.into_iter().map(parse_appointment).collect()
    }

    async fn list_disabled_hours(&self, fixer_id: Uuid, date: NaiveDate) -> Result<Vec<u32>, SchedulingError> {
        #[derive(Deserialize)]
        struct DisabledHourRow {
            hour: u32,
        }

        let path = format!(
            "{}?fixer_id=eq.{}&date=eq.{}&select=hour",
            DISABLED_HOURS_PATH,
            fixer_id,
            to_wire_date(date),
        );

        let rows: Vec<DisabledHourRow> = self.client.request(Method::GET, &path, self.token(), None).await?;

        Ok(rows.into_iter().map(|row| row.hour).filter(|hour| *hour < Slot::HOURS_PER_DAY).collect())
    }

    #[instrument(skip(self))]
    async fn set_hour_disabled(&self, fixer_id: Uuid, slot: Slot, disabled: bool) -> Result<(), SchedulingError> {
        if disabled {
            self.client.request_no_content(
                Method::POST,
                DISABLED_HOURS_PATH,
                self.token(),
                Some(json!({
                    "fixer_id": fixer_id,
                    "date": to_wire_date(slot.date()),
                    "hour": slot.hour(),
                })),
            ).await?;
        } else {
            let path = format!(
                "{}?fixer_id=eq.{}&date=eq.{}&hour=eq.{}",
                DISABLED_HOURS_PATH,
                fixer_id,
                to_wire_date(slot.date()),
                slot.hour(),
            );
            self.client.request_no_content(Method::DELETE, &path, self.token(), None).await?;
        }

        info!("Fixer {} hour {} disabled={}", fixer_id, slot, disabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_appointment(modality: ModalityDetails) -> NewAppointment {
        NewAppointment {
            fixer_id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            slot: Slot::new(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 14).unwrap(),
            details: AppointmentDetails {
                client_name: "Ana Pérez".to_string(),
                client_contact: "71234567".to_string(),
                description: "Fix the boiler".to_string(),
                modality,
            },
        }
    }

    #[test]
    fn virtual_payload_never_carries_location() {
        let new = new_appointment(ModalityDetails::Virtual {
            meeting_link: "https://meet.google.com/abc".to_string(),
        });

        let body = create_payload(&new, &ScheduleClock::default());

        assert_eq!(body["modality"], "virtual");
        assert_eq!(body["meeting_link"], "https://meet.google.com/abc");
        for key in ["location", "location_lat", "location_lon", "location_address"] {
            assert!(body.get(key).is_none(), "{} must be absent", key);
        }
    }

    #[test]
    fn presential_payload_never_carries_meeting_link() {
        let new = new_appointment(ModalityDetails::Presential {
            location: Location { lat: -16.5, lon: -68.1, address: "Calle 21, Calacoto".to_string() },
        });

        let body = create_payload(&new, &ScheduleClock::default());

        assert_eq!(body["modality"], "presential");
        assert_eq!(body["location_address"], "Calle 21, Calacoto");
        assert!(body.get("meeting_link").is_none());
    }

    #[test]
    fn create_payload_applies_schedule_offset() {
        let new = new_appointment(ModalityDetails::Virtual { meeting_link: "https://zoom.us/j/1".to_string() });

        let body = create_payload(&new, &ScheduleClock::default());

        assert_eq!(body["scheduled_date"], "2025-03-10");
        assert_eq!(body["start_time"], "2025-03-10T18:00:00Z");
        assert_eq!(body["end_time"], "2025-03-10T19:00:00Z");
        assert_eq!(body["schedule_state"], "booked");
    }

    #[test]
    fn cancellation_payload_only_touches_state_and_reason() {
        let body = update_payload(&AppointmentUpdate::cancellation(Some("Client travelling".to_string())));

        assert_eq!(body["schedule_state"], "cancelled");
        assert_eq!(body["reschedule_reason"], "Client travelling");
        assert!(body.get("modality").is_none());
        assert!(body.get("start_time").is_none());
    }

    #[test]
    fn malformed_virtual_record_is_rejected() {
        let row = json!({
            "id": Uuid::new_v4(),
            "fixer_id": Uuid::new_v4(),
            "requester_id": Uuid::new_v4(),
            "scheduled_date": "2025-03-10",
            "start_time": "2025-03-10T18:00:00Z",
            "end_time": "2025-03-10T19:00:00Z",
            "schedule_state": "booked",
            "modality": "virtual",
            "client_name": "Ana",
            "client_contact": "71234567",
            "description": "x"
        });

        assert!(matches!(parse_appointment(row), Err(SchedulingError::MalformedRecord(_))));
    }
}
