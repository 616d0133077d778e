// libs/scheduling-cell/src/services/slot.rs
use chrono::{NaiveDate, NaiveDateTime};
use shared_config::AppConfig;
use uuid::Uuid;

use crate::models::{CalendarResponse, DayView, Role, Slot, SlotAction, SlotStatus, SlotView};
use crate::services::availability::AvailabilityLookup;
use crate::services::calendar::CalendarViewController;
use crate::services::time_offset::{is_past, ScheduleClock};

/// How a requester sees an hour that is neither booked nor disabled.
///
/// The current design shows it as unavailable, so requesters cannot tell
/// bookable hours apart until they click. Kept configurable until product
/// confirms whether that is intended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequesterOpenSlotDisplay {
    #[default]
    Unavailable,
    Bookable,
}

impl RequesterOpenSlotDisplay {
    pub fn from_flag(bookable: bool) -> Self {
        if bookable {
            RequesterOpenSlotDisplay::Bookable
        } else {
            RequesterOpenSlotDisplay::Unavailable
        }
    }
}

/// Everything the renderer needs for one cell.
#[derive(Debug, Clone, Copy)]
pub struct SlotContext {
    pub slot: Slot,
    pub role: Role,
    pub is_booked: bool,
    pub is_disabled: bool,
    pub now: NaiveDateTime,
}

pub struct SlotRenderer {
    clock: ScheduleClock,
    requester_open: RequesterOpenSlotDisplay,
}

impl SlotRenderer {
    pub fn new(clock: ScheduleClock, requester_open: RequesterOpenSlotDisplay) -> Self {
        Self {
            clock,
            requester_open,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ScheduleClock::from_config(config),
            RequesterOpenSlotDisplay::from_flag(config.requester_open_slots_bookable),
        )
    }

    /// Status first (past, disabled, booked, open; first match wins), then
    /// the click action for the viewer's role.
    pub fn render(&self, ctx: SlotContext) -> SlotView {
        let slot = ctx.slot;
        let is_today = slot.date() == ctx.now.date();

        let status = if is_past(slot, ctx.now) {
            SlotStatus::Past
        } else if ctx.is_disabled {
            SlotStatus::AvailableForOverride
        } else if ctx.is_booked {
            SlotStatus::Occupied
        } else {
            SlotStatus::Open
        };

        let (label, color_class) = self.presentation(status, ctx.role);

        let action = match (status, ctx.role) {
            (SlotStatus::Past, _) => SlotAction::None,
            (SlotStatus::Occupied, Role::Requester) => SlotAction::EditAppointment { slot },
            (_, Role::Requester) => SlotAction::CreateAppointment {
                slot,
                start_time: self.clock.encode(slot),
            },
            (_, Role::Fixer) => SlotAction::ManageAvailability {
                slot,
                disabled: ctx.is_disabled,
                booked: ctx.is_booked,
            },
        };

        SlotView {
            date: slot.date(),
            hour: slot.hour(),
            status,
            label: label.map(str::to_string),
            color_class: color_class.map(str::to_string),
            action,
            is_today,
        }
    }

    fn presentation(&self, status: SlotStatus, role: Role) -> (Option<&'static str>, Option<&'static str>) {
        match (status, role) {
            (SlotStatus::Past, _) => (None, None),
            (SlotStatus::AvailableForOverride, _) => (Some("Available for override"), Some("slot-override")),
            (SlotStatus::Occupied, _) => (Some("Occupied"), Some("slot-occupied")),
            (SlotStatus::Open, Role::Fixer) => (None, Some("slot-open")),
            (SlotStatus::Open, Role::Requester) => match self.requester_open {
                RequesterOpenSlotDisplay::Unavailable => (Some("Unavailable"), Some("slot-disabled")),
                RequesterOpenSlotDisplay::Bookable => (Some("Available"), Some("slot-open")),
            },
        }
    }

    /// All 24 hours of one date.
    pub fn render_day(
        &self,
        date: NaiveDate,
        role: Role,
        lookup: &impl AvailabilityLookup,
        now: NaiveDateTime,
    ) -> Vec<SlotView> {
        (0..Slot::HOURS_PER_DAY)
            .filter_map(|hour| Slot::new(date, hour).ok())
            .map(|slot| self.render(SlotContext {
                slot,
                role,
                is_booked: lookup.is_hour_booked(slot.date(), slot.hour()),
                is_disabled: lookup.is_disabled(slot.date(), slot.hour()),
                now,
            }))
            .collect()
    }

    pub fn render_calendar(
        &self,
        fixer_id: Uuid,
        calendar: &CalendarViewController,
        role: Role,
        lookup: &impl AvailabilityLookup,
        now: NaiveDateTime,
    ) -> CalendarResponse {
        let days = calendar.visible_dates()
            .into_iter()
            .map(|date| DayView {
                date,
                is_today: date == now.date(),
                in_anchor_month: calendar.is_in_anchor_month(date),
                slots: self.render_day(date, role, lookup, now),
            })
            .collect();

        CalendarResponse {
            fixer_id,
            granularity: calendar.granularity(),
            anchor_date: calendar.anchor_date(),
            days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::models::{AvailabilitySnapshot, Granularity};
    use crate::services::availability::AvailabilityView;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn now() -> NaiveDateTime {
        date(10).and_hms_opt(11, 15, 0).unwrap()
    }

    fn renderer() -> SlotRenderer {
        SlotRenderer::new(ScheduleClock::default(), RequesterOpenSlotDisplay::default())
    }

    fn ctx(slot: Slot, role: Role, is_booked: bool, is_disabled: bool) -> SlotContext {
        SlotContext { slot, role, is_booked, is_disabled, now: now() }
    }

    #[test]
    fn disabled_takes_precedence_over_booked() {
        let slot = Slot::new(date(10), 14).unwrap();

        for role in [Role::Fixer, Role::Requester] {
            let view = renderer().render(ctx(slot, role, true, true));
            assert_eq!(view.status, SlotStatus::AvailableForOverride);
            assert_eq!(view.label.as_deref(), Some("Available for override"));
        }
    }

    #[test]
    fn past_hours_earlier_today_are_never_clickable() {
        for hour in 0..11 {
            let slot = Slot::new(date(10), hour).unwrap();
            for (booked, disabled) in [(false, false), (true, false), (false, true), (true, true)] {
                for role in [Role::Fixer, Role::Requester] {
                    let view = renderer().render(ctx(slot, role, booked, disabled));
                    assert_eq!(view.status, SlotStatus::Past);
                    assert!(!view.is_clickable());
                    assert!(view.label.is_none());
                }
            }
        }
    }

    #[test]
    fn current_hour_is_still_bookable() {
        let slot = Slot::new(date(10), 11).unwrap();
        let view = renderer().render(ctx(slot, Role::Requester, false, false));

        assert_eq!(view.status, SlotStatus::Open);
        assert!(view.is_today);
        assert_eq!(
            view.action,
            SlotAction::CreateAppointment {
                slot,
                start_time: ScheduleClock::default().encode(slot),
            }
        );
    }

    #[test]
    fn requester_clicks_on_occupied_open_an_editor() {
        let slot = Slot::new(date(11), 9).unwrap();
        let view = renderer().render(ctx(slot, Role::Requester, true, false));

        assert_eq!(view.status, SlotStatus::Occupied);
        assert_eq!(view.action, SlotAction::EditAppointment { slot });
    }

    #[test]
    fn fixer_clicks_manage_availability() {
        let slot = Slot::new(date(11), 9).unwrap();
        let view = renderer().render(ctx(slot, Role::Fixer, true, false));

        assert_eq!(view.action, SlotAction::ManageAvailability { slot, disabled: false, booked: true });

        let open = renderer().render(ctx(slot, Role::Fixer, false, false));
        assert_eq!(open.status, SlotStatus::Open);
        assert!(open.label.is_none());
    }

    #[test]
    fn requester_open_slot_display_is_configurable() {
        let slot = Slot::new(date(11), 9).unwrap();

        let current = renderer().render(ctx(slot, Role::Requester, false, false));
        assert_eq!(current.label.as_deref(), Some("Unavailable"));

        let bookable = SlotRenderer::new(ScheduleClock::default(), RequesterOpenSlotDisplay::Bookable)
            .render(ctx(slot, Role::Requester, false, false));
        assert_eq!(bookable.label.as_deref(), Some("Available"));
        assert_eq!(current.action, bookable.action);
    }

    #[test]
    fn every_granularity_reports_the_same_slot_status() {
        let view = AvailabilityView::from_snapshots(vec![AvailabilitySnapshot {
            fixer_id: Uuid::nil(),
            date: date(12),
            booked_hours: BTreeSet::from([9, 14]),
            disabled_hours: BTreeSet::from([14, 18]),
            load_failed: false,
        }]);
        let renderer = renderer();

        let mut statuses = Vec::new();
        for granularity in [Granularity::Day, Granularity::Week, Granularity::Month] {
            let calendar = CalendarViewController::new(granularity, date(12));
            let response = renderer.render_calendar(Uuid::nil(), &calendar, Role::Requester, &view, now());
            let day = response.days.iter().find(|d| d.date == date(12)).unwrap();
            statuses.push(day.slots.iter().map(|s| s.status).collect::<Vec<_>>());
        }

        assert_eq!(statuses[0], statuses[1]);
        assert_eq!(statuses[1], statuses[2]);
        assert_eq!(statuses[0][9], SlotStatus::Occupied);
        assert_eq!(statuses[0][14], SlotStatus::AvailableForOverride);
        assert_eq!(statuses[0][18], SlotStatus::AvailableForOverride);
    }
}
