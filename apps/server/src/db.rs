use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::models::{
    Booking, CreateEmployeeRequest, Employee, OperatingHour, Salon, ScheduleRow, Service,
};
use crate::schedule;
use crate::slots::BusyInterval;

/// Statuses that still hold an employee's time.
pub const ACTIVE_STATUSES_SQL: &str = "('pending', 'verified')";

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // Enable WAL mode for better concurrent access
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;

    // Create migrations tracking table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, "001_init").await? {
        let migration_sql = include_str!("../migrations/001_init.sql");
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(pool).await?;
            }
        }
        mark_applied(pool, "001_init").await?;
        tracing::info!("Applied migration: 001_init");
    }

    // 002: lookups used by the slot generator and the reaper
    if !is_applied(pool, "002_indexes").await? {
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_bookings_employee_start ON bookings(employee_id, start_at)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_status_created ON bookings(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_customer ON bookings(customer_tg_id)",
            "CREATE INDEX IF NOT EXISTS idx_schedules_employee ON employee_schedules(employee_id)",
            "CREATE INDEX IF NOT EXISTS idx_owner_accounts_active ON owner_accounts(is_active, verified_payment)",
        ] {
            sqlx::query(statement).execute(pool).await?;
        }
        mark_applied(pool, "002_indexes").await?;
        tracing::info!("Applied migration: 002_indexes");
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

async fn is_applied(pool: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
}

async fn mark_applied(pool: &SqlitePool, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Loaders ──

const SALON_COLUMNS: &str = "id, name, owner_tg_id, contact_chat_id, opening_time, closing_time,
     works_mon, works_tue, works_wed, works_thu, works_fri, works_sat, works_sun,
     deposit_percentage, utc_offset_minutes, is_active";

pub async fn fetch_salon(pool: &SqlitePool, salon_id: i64) -> Result<Option<Salon>, sqlx::Error> {
    sqlx::query_as::<_, Salon>(&format!("SELECT {SALON_COLUMNS} FROM salons WHERE id = ?"))
        .bind(salon_id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_operating_hours(
    pool: &SqlitePool,
    salon_id: i64,
) -> Result<Vec<OperatingHour>, sqlx::Error> {
    sqlx::query_as::<_, OperatingHour>(
        "SELECT salon_id, weekday, open_time, close_time, is_closed
         FROM operating_hours WHERE salon_id = ? ORDER BY weekday ASC",
    )
    .bind(salon_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_employee(
    pool: &SqlitePool,
    employee_id: i64,
) -> Result<Option<Employee>, sqlx::Error> {
    sqlx::query_as::<_, Employee>(
        "SELECT id, salon_id, name, tg_id, is_active, lunch_start, lunch_end
         FROM employees WHERE id = ?",
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_schedule_rows(
    pool: &SqlitePool,
    employee_id: i64,
) -> Result<Vec<ScheduleRow>, sqlx::Error> {
    sqlx::query_as::<_, ScheduleRow>(
        "SELECT weekday, hours, iso_year, iso_week
         FROM employee_schedules WHERE employee_id = ?
         ORDER BY iso_year ASC, iso_week ASC, weekday ASC",
    )
    .bind(employee_id)
    .fetch_all(pool)
    .await
}

/// Active services of `salon_id` in the order requested. Unknown or inactive
/// ids are simply absent from the result.
pub async fn fetch_services(
    pool: &SqlitePool,
    salon_id: i64,
    ids: &[i64],
) -> Result<Vec<Service>, sqlx::Error> {
    let all = sqlx::query_as::<_, Service>(
        "SELECT id, salon_id, name, duration_min, buffer_min, price, is_active
         FROM services WHERE salon_id = ? AND is_active = 1",
    )
    .bind(salon_id)
    .fetch_all(pool)
    .await?;

    Ok(ids
        .iter()
        .filter_map(|id| all.iter().find(|s| s.id == *id).cloned())
        .collect())
}

/// Intervals the employee is occupied in `[from, to)`. Unpaid holds created
/// before `unpaid_before` have lapsed and no longer count.
pub async fn fetch_busy_intervals(
    pool: &SqlitePool,
    employee_id: i64,
    from: NaiveDateTime,
    to: NaiveDateTime,
    unpaid_before: NaiveDateTime,
) -> Result<Vec<BusyInterval>, sqlx::Error> {
    sqlx::query_as::<_, BusyInterval>(
        "SELECT start_at, end_at FROM bookings
         WHERE employee_id = ?
         AND (status = 'verified' OR (status = 'pending' AND created_at >= ?))
         AND start_at < ? AND end_at > ?
         ORDER BY start_at ASC",
    )
    .bind(employee_id)
    .bind(unpaid_before)
    .bind(to)
    .bind(from)
    .fetch_all(pool)
    .await
}

const BOOKING_COLUMNS: &str = "id, salon_id, employee_id, customer_tg_id, customer_name,
     customer_username, start_at, end_at, total_price, deposit_amount, status,
     created_at, updated_at";

pub async fn fetch_booking(pool: &SqlitePool, booking_id: i64) -> Result<Option<Booking>, sqlx::Error> {
    sqlx::query_as::<_, Booking>(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?"))
        .bind(booking_id)
        .fetch_optional(pool)
        .await
}

/// A customer's bookings that still hold a slot, soonest first.
pub async fn fetch_customer_bookings(
    pool: &SqlitePool,
    customer_tg_id: i64,
) -> Result<Vec<Booking>, sqlx::Error> {
    sqlx::query_as::<_, Booking>(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE customer_tg_id = ? AND status IN {ACTIVE_STATUSES_SQL}
         ORDER BY start_at ASC"
    ))
    .bind(customer_tg_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_booking_service_names(
    pool: &SqlitePool,
    booking_id: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT service_name FROM booking_services WHERE booking_id = ? ORDER BY id ASC")
        .bind(booking_id)
        .fetch_all(pool)
        .await
}

/// Insert an employee together with the default weekly schedule.
pub async fn create_employee(
    pool: &SqlitePool,
    salon_id: i64,
    req: &CreateEmployeeRequest,
) -> Result<Employee, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let id = sqlx::query(
        "INSERT INTO employees (salon_id, name, tg_id, lunch_start, lunch_end)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(salon_id)
    .bind(&req.name)
    .bind(req.tg_id)
    .bind(&req.lunch_start)
    .bind(&req.lunch_end)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (weekday, hours) in schedule::default_employee_rows() {
        sqlx::query("INSERT INTO employee_schedules (employee_id, weekday, hours) VALUES (?, ?, ?)")
            .bind(id)
            .bind(weekday)
            .bind(hours)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(Employee {
        id,
        salon_id,
        name: req.name.clone(),
        tg_id: req.tg_id,
        is_active: true,
        lunch_start: req.lunch_start.clone(),
        lunch_end: req.lunch_end.clone(),
    })
}

// ── Test fixtures ──


// ── Tests ──
