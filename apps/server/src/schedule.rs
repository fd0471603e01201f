//! Operating-hour model and the interval resolver.
//!
//! Every stored representation (salon weekday flags, `operating_hours` rows,
//! free-text `"HH:MM-HH:MM"` employee entries, ISO-week overrides) is adapted
//! into [`WeeklyHours`] / [`EmployeeSchedule`] here, at the persistence
//! boundary. The resolver itself only ever sees the typed model.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{Employee, OperatingHour, Salon, ScheduleRow};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("malformed time of day: {0:?}")]
    BadTime(String),
    #[error("malformed hours entry: {0:?}")]
    BadHours(String),
    #[error("open and close are identical: {0}")]
    EmptyWindow(NaiveTime),
    #[error("weekday out of range: {0}")]
    BadWeekday(i64),
}

// ── Typed model ──

/// Open/close pair for one day. `close < open` means the shift runs past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl TimeWindow {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self, ScheduleError> {
        if open == close {
            return Err(ScheduleError::EmptyWindow(open));
        }
        Ok(Self { open, close })
    }

    pub fn is_overnight(&self) -> bool {
        self.close < self.open
    }

    /// Anchor the window on `date`, rolling the close over to the next day if needed.
    pub fn on(&self, date: NaiveDate) -> WorkingWindow {
        let start = date.and_time(self.open);
        let mut end = date.and_time(self.close);
        if self.is_overnight() {
            end += Duration::days(1);
        }
        WorkingWindow { start, end }
    }
}

/// Concrete half-open `[start, end)` interval in salon-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl WorkingWindow {
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at < self.end
    }

    pub fn intersect(&self, other: &WorkingWindow) -> Option<WorkingWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(WorkingWindow { start, end })
    }
}

/// Weekday (Monday = 0) → hours, `None` meaning closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklyHours {
    days: [Option<TimeWindow>; 7],
}

impl WeeklyHours {
    pub fn uniform(window: TimeWindow, work_days: [bool; 7]) -> Self {
        let mut days = [None; 7];
        for (slot, works) in days.iter_mut().zip(work_days) {
            if works {
                *slot = Some(window);
            }
        }
        Self { days }
    }

    pub fn set(&mut self, weekday: usize, hours: Option<TimeWindow>) {
        if let Some(slot) = self.days.get_mut(weekday) {
            *slot = hours;
        }
    }

    pub fn get(&self, weekday: usize) -> Option<TimeWindow> {
        self.days.get(weekday).copied().flatten()
    }

    pub fn window_on(&self, date: NaiveDate) -> Option<WorkingWindow> {
        self.get(weekday_index(date)).map(|w| w.on(date))
    }
}

/// Default week plus per-ISO-week exceptions.
///
/// An override entry of `Some(None)` closes that day for the week; a missing
/// entry falls through to the default week.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmployeeSchedule {
    pub default: WeeklyHours,
    overrides: HashMap<(i32, u32), [Option<Option<TimeWindow>>; 7]>,
}

impl EmployeeSchedule {
    pub fn new(default: WeeklyHours) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn set_override(
        &mut self,
        iso_year: i32,
        iso_week: u32,
        weekday: usize,
        hours: Option<TimeWindow>,
    ) {
        if weekday < 7 {
            self.overrides.entry((iso_year, iso_week)).or_default()[weekday] = Some(hours);
        }
    }

    pub fn hours_for(&self, date: NaiveDate) -> Option<TimeWindow> {
        let weekday = weekday_index(date);
        let iso = date.iso_week();
        if let Some(week) = self.overrides.get(&(iso.year(), iso.week())) {
            if let Some(entry) = week[weekday] {
                return entry;
            }
        }
        self.default.get(weekday)
    }

    pub fn window_on(&self, date: NaiveDate) -> Option<WorkingWindow> {
        self.hours_for(date).map(|w| w.on(date))
    }
}

// ── Resolver ──

/// Bookable window for `date`: the salon's hours intersected with the employee's.
///
/// `None` when either side is closed or the two windows do not overlap.
pub fn resolve_working_window(
    salon: &WeeklyHours,
    employee: &EmployeeSchedule,
    date: NaiveDate,
) -> Option<WorkingWindow> {
    let salon_window = salon.window_on(date)?;
    let employee_window = employee.window_on(date)?;
    salon_window.intersect(&employee_window)
}

/// Current-status check that also honors yesterday's overnight shift.
pub fn is_open_at(hours: &WeeklyHours, at: NaiveDateTime) -> bool {
    let today = at.date();
    if hours.window_on(today).is_some_and(|w| w.contains(at)) {
        return true;
    }
    today
        .pred_opt()
        .and_then(|yesterday| hours.window_on(yesterday))
        .is_some_and(|w| w.contains(at))
}

pub fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_monday() as usize
}

// ── Persistence adapters ──

pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ScheduleError> {
    let s = raw.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ScheduleError::BadTime(raw.to_string()))
}

/// Parse a free-text day entry: `"09:00-18:00"`, or `"CERRADO"` / `"closed"`.
pub fn parse_day_hours(raw: &str) -> Result<Option<TimeWindow>, ScheduleError> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("cerrado") || s.eq_ignore_ascii_case("closed") {
        return Ok(None);
    }
    let (open, close) = s
        .split_once('-')
        .ok_or_else(|| ScheduleError::BadHours(raw.to_string()))?;
    let window = TimeWindow::new(parse_time_of_day(open)?, parse_time_of_day(close)?)?;
    Ok(Some(window))
}

fn weekday_slot(weekday: i64) -> Result<usize, ScheduleError> {
    usize::try_from(weekday)
        .ok()
        .filter(|d| *d < 7)
        .ok_or(ScheduleError::BadWeekday(weekday))
}

/// Build a salon's week from its flags, default times and `operating_hours` rows.
///
/// A false weekday flag closes the day regardless of rows. Anything malformed
/// closes only the affected day(s).
pub fn salon_hours(salon: &Salon, rows: &[OperatingHour]) -> WeeklyHours {
    let default = parse_time_of_day(&salon.opening_time)
        .and_then(|open| TimeWindow::new(open, parse_time_of_day(&salon.closing_time)?));
    let mut hours = match default {
        Ok(window) => WeeklyHours::uniform(window, salon.work_days()),
        Err(e) => {
            tracing::warn!(salon_id = salon.id, "default salon hours unusable: {}", e);
            WeeklyHours::default()
        }
    };

    for row in rows {
        let day = match weekday_slot(row.weekday) {
            Ok(day) => day,
            Err(e) => {
                tracing::warn!(salon_id = salon.id, "skipping operating hour: {}", e);
                continue;
            }
        };
        if !salon.work_days()[day] {
            continue;
        }
        let window = if row.is_closed {
            None
        } else {
            parse_time_of_day(&row.open_time)
                .and_then(|open| TimeWindow::new(open, parse_time_of_day(&row.close_time)?))
                .map_err(|e| {
                    tracing::warn!(salon_id = salon.id, weekday = day, "closing day: {}", e);
                })
                .ok()
        };
        hours.set(day, window);
    }
    hours
}

/// Build an employee's schedule from `employee_schedules` rows.
pub fn employee_schedule(employee_id: i64, rows: &[ScheduleRow]) -> EmployeeSchedule {
    let mut schedule = EmployeeSchedule::default();
    for row in rows {
        let day = match weekday_slot(row.weekday) {
            Ok(day) => day,
            Err(e) => {
                tracing::warn!(employee_id, "skipping schedule row: {}", e);
                continue;
            }
        };
        let window = parse_day_hours(&row.hours).unwrap_or_else(|e| {
            tracing::warn!(employee_id, weekday = day, "closing day: {}", e);
            None
        });
        if row.iso_year == 0 {
            schedule.default.set(day, window);
        } else {
            match (i32::try_from(row.iso_year), u32::try_from(row.iso_week)) {
                (Ok(year), Ok(week)) => schedule.set_override(year, week, day, window),
                _ => tracing::warn!(employee_id, "skipping override with bad ISO week"),
            }
        }
    }
    schedule
}

/// The employee's fixed lunch break, if configured and well-formed.
pub fn lunch_break(employee: &Employee) -> Option<TimeWindow> {
    let (start, end) = (employee.lunch_start.as_deref()?, employee.lunch_end.as_deref()?);
    let parsed = parse_time_of_day(start)
        .and_then(|s| TimeWindow::new(s, parse_time_of_day(end)?))
        .ok()
        .filter(|w| !w.is_overnight());
    if parsed.is_none() {
        tracing::warn!(employee_id = employee.id, "ignoring malformed lunch break");
    }
    parsed
}

/// Default week for newly created employees: Monday–Saturday 09:00–18:00.
pub fn default_employee_rows() -> Vec<(i64, &'static str)> {
    (0..7)
        .map(|day| (day, if day < 6 { "09:00-18:00" } else { "CERRADO" }))
        .collect()
}

// ── Tests ──
