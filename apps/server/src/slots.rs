use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;

use crate::config::BookingPolicy;
use crate::db;
use crate::models::{Employee, Salon, Service, SlotOption};
use crate::schedule::{self, TimeWindow, WorkingWindow};

/// An existing non-terminal booking occupying the employee, buffer included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct BusyInterval {
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
}

/// Half-open `[a_start, a_end)` vs `[b_start, b_end)` overlap test.
pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Total time a bundle of services blocks the employee: durations plus buffers.
pub fn required_duration(services: &[Service]) -> Duration {
    let minutes: i64 = services
        .iter()
        .map(|s| s.duration_min + s.buffer_min.max(0))
        .sum();
    Duration::minutes(minutes)
}

/// Human label for a slot start, e.g. `9:30 AM`.
pub fn slot_label(start: NaiveDateTime) -> String {
    start.format("%-I:%M %p").to_string()
}

/// Enumerate bookable starts inside `window`, stepping by `policy.slot_step`.
///
/// A candidate is dropped when it starts within `policy.lead_time` of `now`,
/// touches the lunch break, or overlaps any busy interval.
pub fn generate_slots(
    window: WorkingWindow,
    required: Duration,
    lunch: Option<TimeWindow>,
    busy: &[BusyInterval],
    now: NaiveDateTime,
    policy: &BookingPolicy,
) -> Vec<SlotOption> {
    let mut slots = Vec::new();
    if required <= Duration::zero() || policy.slot_step <= Duration::zero() {
        return slots;
    }

    let earliest = now + policy.lead_time;
    let lunch = lunch.map(|l| l.on(window.start.date()));

    let mut start = window.start;
    while start + required <= window.end {
        let end = start + required;

        let too_soon = start <= earliest;
        let during_lunch = lunch.is_some_and(|l| overlaps(start, end, l.start, l.end));
        let collides = busy
            .iter()
            .any(|b| overlaps(start, end, b.start_at, b.end_at));

        if !too_soon && !during_lunch && !collides {
            slots.push(SlotOption {
                value: start.format("%H:%M").to_string(),
                label: slot_label(start),
                starts_at: start,
            });
        }
        start += policy.slot_step;
    }
    slots
}

/// Load everything needed for one (employee, date) and generate the offer list.
///
/// Disabled salons and inactive employees have no availability.
pub async fn slots_for(
    pool: &SqlitePool,
    salon: &Salon,
    employee: &Employee,
    services: &[Service],
    date: NaiveDate,
    now: NaiveDateTime,
    policy: &BookingPolicy,
) -> Result<Vec<SlotOption>, sqlx::Error> {
    if !salon.is_active || !employee.is_active || employee.salon_id != salon.id {
        return Ok(Vec::new());
    }

    let salon_rows = db::fetch_operating_hours(pool, salon.id).await?;
    let schedule_rows = db::fetch_schedule_rows(pool, employee.id).await?;
    let salon_hours = schedule::salon_hours(salon, &salon_rows);
    let employee_hours = schedule::employee_schedule(employee.id, &schedule_rows);

    let Some(window) = schedule::resolve_working_window(&salon_hours, &employee_hours, date)
    else {
        return Ok(Vec::new());
    };

    // `now` is salon-local; booking timestamps are stored in UTC.
    let now_utc = now - Duration::minutes(salon.utc_offset_minutes);
    let busy = db::fetch_busy_intervals(
        pool,
        employee.id,
        window.start,
        window.end,
        policy.unpaid_before(now_utc),
    )
    .await?;

    Ok(generate_slots(
        window,
        required_duration(services),
        schedule::lunch_break(employee),
        &busy,
        now,
        policy,
    ))
}

// ── Tests ──
