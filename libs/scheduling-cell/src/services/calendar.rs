// libs/scheduling-cell/src/services/calendar.rs
use chrono::{Datelike, Days, Duration, Months, NaiveDate};
use tracing::{debug, warn};

use crate::models::{Direction, Granularity};

pub const DAYS_PER_WEEK: usize = 7;

/// Monday of the week containing `date`. Sunday belongs to the week that
/// started six days earlier.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let day_of_week = date.weekday().num_days_from_sunday() as i64;
    let offset = if day_of_week == 0 { -6 } else { 1 - day_of_week };
    date + Duration::days(offset)
}

pub fn week_dates(date: NaiveDate) -> Vec<NaiveDate> {
    week_start(date).iter_days().take(DAYS_PER_WEEK).collect()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day0() as i64)
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    let first = first_of_month(date);
    first.iter_days()
        .take_while(|d| d.month() == first.month())
        .last()
        .unwrap_or(first)
}

/// Monday-start weeks covering the whole month of `date`.
pub fn month_grid(date: NaiveDate) -> Vec<NaiveDate> {
    let start = week_start(first_of_month(date));
    let end = week_start(last_of_month(date)) + Duration::days(DAYS_PER_WEEK as i64 - 1);
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Which calendar is shown and around which date. Performs no I/O; the
/// dates it exposes are what the availability index has to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarViewController {
    granularity: Granularity,
    anchor_date: NaiveDate,
}

impl CalendarViewController {
    pub fn new(granularity: Granularity, anchor_date: NaiveDate) -> Self {
        Self {
            granularity,
            anchor_date,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn anchor_date(&self) -> NaiveDate {
        self.anchor_date
    }

    /// Switching granularity keeps the anchor date.
    pub fn set_granularity(&mut self, granularity: Granularity) {
        debug!("Calendar granularity {} -> {}", self.granularity, granularity);
        self.granularity = granularity;
    }

    pub fn set_anchor(&mut self, anchor_date: NaiveDate) {
        self.anchor_date = anchor_date;
    }

    pub fn go_to_today(&mut self, today: NaiveDate) {
        self.anchor_date = today;
    }

    /// Moves the anchor one month, week or day depending on granularity.
    pub fn navigate(&mut self, direction: Direction) {
        let moved = match (self.granularity, direction) {
            (Granularity::Month, Direction::Forward) => self.anchor_date.checked_add_months(Months::new(1)),
            (Granularity::Month, Direction::Back) => self.anchor_date.checked_sub_months(Months::new(1)),
            (Granularity::Week, Direction::Forward) => self.anchor_date.checked_add_days(Days::new(7)),
            (Granularity::Week, Direction::Back) => self.anchor_date.checked_sub_days(Days::new(7)),
            (Granularity::Day, Direction::Forward) => self.anchor_date.checked_add_days(Days::new(1)),
            (Granularity::Day, Direction::Back) => self.anchor_date.checked_sub_days(Days::new(1)),
        };

        match moved {
            Some(anchor) => self.anchor_date = anchor,
            None => warn!("Cannot navigate {:?} from {}: date out of range", direction, self.anchor_date),
        }
    }

    pub fn visible_dates(&self) -> Vec<NaiveDate> {
        match self.granularity {
            Granularity::Day => vec![self.anchor_date],
            Granularity::Week => week_dates(self.anchor_date),
            Granularity::Month => month_grid(self.anchor_date),
        }
    }

    /// First and last visible date, inclusive.
    pub fn visible_range(&self) -> (NaiveDate, NaiveDate) {
        match self.granularity {
            Granularity::Day => (self.anchor_date, self.anchor_date),
            Granularity::Week => {
                let start = week_start(self.anchor_date);
                (start, start + Duration::days(DAYS_PER_WEEK as i64 - 1))
            }
            Granularity::Month => {
                let start = week_start(first_of_month(self.anchor_date));
                let end = week_start(last_of_month(self.anchor_date)) + Duration::days(DAYS_PER_WEEK as i64 - 1);
                (start, end)
            }
        }
    }

    pub fn is_in_anchor_month(&self, date: NaiveDate) -> bool {
        date.year() == self.anchor_date.year() && date.month() == self.anchor_date.month()
    }
}
