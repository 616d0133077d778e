// libs/scheduling-cell/src/services/time_offset.rs
//
// Slot hours are wall-clock hours in a fixed UTC offset (UTC-4 for the current
// backend). Every timestamp written to the backend goes through `encode` and
// every timestamp read back goes through `decode`.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, TimeZone,
    Timelike, Utc,
};
use tracing::warn;

use shared_config::AppConfig;

use crate::error::SchedulingError;
use crate::models::Slot;

pub const BACKEND_UTC_OFFSET_HOURS: i32 = -4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleClock {
    offset: FixedOffset,
}

impl Default for ScheduleClock {
    fn default() -> Self {
        Self {
            offset: FixedOffset::west_opt(-BACKEND_UTC_OFFSET_HOURS * 3600)
                .unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl ScheduleClock {
    pub fn new(utc_offset_hours: i32) -> Result<Self, SchedulingError> {
        FixedOffset::east_opt(utc_offset_hours * 3600)
            .map(|offset| Self { offset })
            .ok_or_else(|| SchedulingError::InvalidSlot(format!("UTC offset {}h is out of range", utc_offset_hours)))
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.schedule_utc_offset_hours).unwrap_or_else(|e| {
            warn!("{}; falling back to UTC{:+}", e, BACKEND_UTC_OFFSET_HOURS);
            Self::default()
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Absolute start instant of a slot.
    pub fn encode(&self, slot: Slot) -> DateTime<Utc> {
        let local = slot.date().and_time(NaiveTime::MIN) + Duration::hours(slot.hour() as i64);
        let utc = local - Duration::seconds(self.offset.local_minus_utc() as i64);
        Utc.from_utc_datetime(&utc)
    }

    /// Absolute end instant of a slot; slots are exactly one hour long.
    pub fn encode_end(&self, slot: Slot) -> DateTime<Utc> {
        self.encode(slot) + Duration::hours(1)
    }

    /// Slot containing an absolute instant.
    pub fn decode(&self, instant: DateTime<Utc>) -> Slot {
        Slot::containing(self.to_local(instant))
    }

    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    pub fn now_local(&self) -> NaiveDateTime {
        self.to_local(Utc::now())
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date()
    }
}

/// A slot is past when its date is before today, or it is today and its hour
/// is before the current hour. The current hour itself is not past.
pub fn is_past(slot: Slot, now: NaiveDateTime) -> bool {
    let today = now.date();
    slot.date() < today || (slot.date() == today && slot.hour() < now.hour())
}

pub fn to_wire_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn to_wire_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
