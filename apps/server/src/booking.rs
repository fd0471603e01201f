//! Booking lifecycle: creation with a write-time availability re-check and
//! guarded status transitions.
//!
//! ```text
//! pending ──verify──▶ verified ──complete──▶ completed
//!    │                   │
//!    ├──cancel──▶ cancelled ◀──cancel──┘
//!    └──(deadline)──▶ expired
//! ```

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use crate::config::BookingPolicy;
use crate::db::{self, ACTIVE_STATUSES_SQL};
use crate::error::BookingError;
use crate::models::{Booking, CreateBookingRequest, Salon, TelegramUser};
use crate::notify::{self, Notifier};
use crate::schedule;
use crate::slots;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    Verified,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Verified => "verified",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(BookingStatus::Pending),
            "verified" => Some(BookingStatus::Verified),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "expired" => Some(BookingStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    /// The state machine. Returns the status `command` leads to from `self`.
    pub fn apply(self, command: BookingCommand) -> Result<BookingStatus, BookingError> {
        use BookingCommand::*;
        use BookingStatus::*;

        if self.is_terminal() {
            return Err(BookingError::AlreadyProcessed { status: self });
        }
        match (self, command) {
            (Pending, Verify) => Ok(Verified),
            (Verified, Verify) => Err(BookingError::AlreadyProcessed { status: self }),
            (Pending | Verified, Cancel) => Ok(Cancelled),
            (Verified, Complete) => Ok(Completed),
            (from, Complete) => Err(BookingError::InvalidTransition {
                from,
                to: Completed,
            }),
            (_, _) => Err(BookingError::AlreadyProcessed { status: self }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingCommand {
    Verify,
    Cancel,
    Complete,
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer(i64),
    Owner(i64),
    PaymentWebhook,
    System,
}

fn authorize(
    actor: Actor,
    command: BookingCommand,
    booking: &Booking,
    salon: &Salon,
) -> Result<(), BookingError> {
    let is_owner = matches!(actor, Actor::Owner(id) if id == salon.owner_tg_id);
    let allowed = match command {
        BookingCommand::Verify => {
            is_owner || matches!(actor, Actor::PaymentWebhook | Actor::System)
        }
        BookingCommand::Cancel => {
            is_owner
                || actor == Actor::System
                || matches!(actor, Actor::Customer(id) if id == booking.customer_tg_id)
        }
        BookingCommand::Complete => is_owner || actor == Actor::System,
    };
    if allowed {
        Ok(())
    } else {
        Err(BookingError::Permission)
    }
}

/// `round(total * percentage / 100)`, half-up, in integer currency units.
pub fn compute_deposit(total_price: i64, percentage: i64) -> Result<i64, BookingError> {
    if total_price < 0 {
        return Err(BookingError::Configuration(format!(
            "negative total price {total_price}"
        )));
    }
    if !(0..=100).contains(&percentage) {
        return Err(BookingError::Configuration(format!(
            "deposit percentage {percentage} out of range"
        )));
    }
    let deposit = total_price
        .checked_mul(percentage)
        .and_then(|scaled| scaled.checked_add(50))
        .map(|scaled| scaled / 100)
        .ok_or_else(|| {
            BookingError::Configuration(format!("total price {total_price} is too large"))
        })?;
    if deposit <= 0 {
        return Err(BookingError::Configuration(format!(
            "deposit of {percentage}% on {total_price} is not positive"
        )));
    }
    Ok(deposit)
}

/// Serializes writers per employee inside this process.
#[derive(Default)]
pub struct EmployeeLocks {
    inner: DashMap<i64, Arc<Mutex<()>>>,
}

impl EmployeeLocks {
    pub fn lock_for(&self, employee_id: i64) -> Arc<Mutex<()>> {
        self.inner.entry(employee_id).or_default().clone()
    }
}

fn stamp(now: DateTime<Utc>) -> NaiveDateTime {
    now.naive_utc().trunc_subsecs(0)
}

/// Move a booking from `from` to `to` only if it is still in `from`.
///
/// Returns `false` when another writer got there first.
pub async fn compare_and_set(
    pool: &SqlitePool,
    booking_id: i64,
    from: BookingStatus,
    to: BookingStatus,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(stamp(now))
            .bind(booking_id)
            .bind(from.as_str())
            .execute(pool)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Pending insert that only lands if nothing non-terminal overlaps
/// `[start_at, end_at)` for the employee. `None` means the slot was taken.
pub struct PendingBooking<'a> {
    pub salon_id: i64,
    pub employee_id: i64,
    pub customer: &'a TelegramUser,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub total_price: i64,
    pub deposit_amount: i64,
    pub created_at: NaiveDateTime,
}

pub async fn insert_if_free(
    tx: &mut Transaction<'_, Sqlite>,
    b: &PendingBooking<'_>,
) -> Result<Option<i64>, sqlx::Error> {
    let customer_name = match &b.customer.last_name {
        Some(last) => format!("{} {}", b.customer.first_name, last),
        None => b.customer.first_name.clone(),
    };

    let result = sqlx::query(&format!(
        "INSERT INTO bookings (salon_id, employee_id, customer_tg_id, customer_name,
         customer_username, start_at, end_at, total_price, deposit_amount, status,
         created_at, updated_at)
         SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?
         WHERE NOT EXISTS (
             SELECT 1 FROM bookings
             WHERE employee_id = ? AND status IN {ACTIVE_STATUSES_SQL}
             AND start_at < ? AND end_at > ?
         )"
    ))
    .bind(b.salon_id)
    .bind(b.employee_id)
    .bind(b.customer.id)
    .bind(customer_name)
    .bind(&b.customer.username)
    .bind(b.start_at)
    .bind(b.end_at)
    .bind(b.total_price)
    .bind(b.deposit_amount)
    .bind(b.created_at)
    .bind(b.created_at)
    .bind(b.employee_id)
    .bind(b.end_at)
    .bind(b.start_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(result.last_insert_rowid()))
}

/// Release the employee's unpaid holds that overlap `[start_at, end_at)` and
/// have missed the payment deadline. Returns the ids that changed.
async fn release_lapsed(
    tx: &mut Transaction<'_, Sqlite>,
    employee_id: i64,
    start_at: NaiveDateTime,
    end_at: NaiveDateTime,
    unpaid_before: NaiveDateTime,
    target: BookingStatus,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE bookings SET status = ?, updated_at = ?
         WHERE employee_id = ? AND status = 'pending' AND created_at < ?
         AND start_at < ? AND end_at > ?
         RETURNING id",
    )
    .bind(target.as_str())
    .bind(stamp(now))
    .bind(employee_id)
    .bind(unpaid_before)
    .bind(end_at)
    .bind(start_at)
    .fetch_all(&mut **tx)
    .await
}

/// Tell the customer and the salon that an unpaid booking was released.
pub async fn announce_expired(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    booking_id: i64,
    limit: std::time::Duration,
) {
    let booking = match db::fetch_booking(pool, booking_id).await {
        Ok(Some(b)) => b,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(booking_id, "cannot load expired booking: {}", e);
            return;
        }
    };
    let contact = match db::fetch_salon(pool, booking.salon_id).await {
        Ok(salon) => salon.and_then(|s| s.contact_chat_id),
        Err(e) => {
            tracing::warn!(booking_id, "cannot load salon: {}", e);
            None
        }
    };

    let text = notify::booking_expired(&booking);
    notify::dispatch(notifier, Some(booking.customer_tg_id), &text, limit).await;
    notify::dispatch(notifier, contact, &text, limit).await;
}

// ── Manager ──

pub struct BookingManager {
    pub db: SqlitePool,
    pub policy: BookingPolicy,
    pub notifier: Arc<dyn Notifier>,
    locks: EmployeeLocks,
}

impl BookingManager {
    pub fn new(db: SqlitePool, policy: BookingPolicy, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            policy,
            notifier,
            locks: EmployeeLocks::default(),
        }
    }

    /// Create a pending booking for `customer`.
    ///
    /// The requested start must still be among the offered slots when
    /// re-checked under the employee lock, and the insert itself refuses to
    /// land on top of an overlapping booking.
    pub async fn create(
        &self,
        req: &CreateBookingRequest,
        customer: &TelegramUser,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        if req.service_ids.is_empty() {
            return Err(BookingError::Validation(
                "at least one service is required".into(),
            ));
        }
        let start_time = schedule::parse_time_of_day(&req.start_time)
            .map_err(|e| BookingError::Validation(e.to_string()))?;

        let salon = db::fetch_salon(&self.db, req.salon_id)
            .await?
            .ok_or(BookingError::NotFound("salon"))?;
        if !salon.is_active {
            return Err(BookingError::Validation(
                "salon is not accepting bookings".into(),
            ));
        }
        let employee = db::fetch_employee(&self.db, req.employee_id)
            .await?
            .filter(|e| e.salon_id == salon.id && e.is_active)
            .ok_or(BookingError::NotFound("employee"))?;
        let services = db::fetch_services(&self.db, salon.id, &req.service_ids).await?;
        if services.len() != req.service_ids.len() {
            return Err(BookingError::NotFound("service"));
        }

        let total_price = services
            .iter()
            .try_fold(0i64, |sum, s| sum.checked_add(s.price))
            .ok_or_else(|| BookingError::Configuration("service prices overflow".into()))?;
        let deposit_amount = compute_deposit(total_price, salon.deposit_percentage)?;
        let requested = start_time.format("%H:%M").to_string();

        let lock = self.locks.lock_for(employee.id);
        let guard = lock.lock().await;

        let offered = slots::slots_for(
            &self.db,
            &salon,
            &employee,
            &services,
            req.date,
            salon.local_time(now),
            &self.policy,
        )
        .await?;
        let start_at = offered
            .iter()
            .find(|s| s.value == requested)
            .map(|s| s.starts_at)
            .ok_or(BookingError::SlotTaken)?;
        let end_at = start_at + slots::required_duration(&services);

        let mut tx = self.db.begin().await?;
        let released = release_lapsed(
            &mut tx,
            employee.id,
            start_at,
            end_at,
            self.policy.unpaid_before(now.naive_utc()),
            self.policy.expired_status,
            now,
        )
        .await?;
        let pending = PendingBooking {
            salon_id: salon.id,
            employee_id: employee.id,
            customer,
            start_at,
            end_at,
            total_price,
            deposit_amount,
            created_at: stamp(now),
        };
        let Some(booking_id) = insert_if_free(&mut tx, &pending).await? else {
            tracing::info!(employee_id = employee.id, "slot {} lost at insert", start_at);
            return Err(BookingError::SlotTaken);
        };

        for service in &services {
            sqlx::query(
                "INSERT INTO booking_services
                 (booking_id, service_id, service_name, duration_min, buffer_min, price)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(booking_id)
            .bind(service.id)
            .bind(&service.name)
            .bind(service.duration_min)
            .bind(service.buffer_min)
            .bind(service.price)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        drop(guard);

        let booking = db::fetch_booking(&self.db, booking_id)
            .await?
            .ok_or(BookingError::NotFound("booking"))?;
        tracing::info!(
            booking_id,
            employee_id = employee.id,
            "booking created for {} → {}",
            start_at,
            end_at
        );

        let limit = self.policy.delivery_timeout;
        for lapsed_id in released {
            tracing::info!(booking_id = lapsed_id, "unpaid booking released for a new one");
            announce_expired(&self.db, self.notifier.as_ref(), lapsed_id, limit).await;
        }
        let names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        notify::dispatch(
            self.notifier.as_ref(),
            salon.contact_chat_id,
            &notify::booking_created(&booking, &names),
            limit,
        )
        .await;

        Ok(booking)
    }

    /// Apply one lifecycle command on behalf of `actor`.
    pub async fn apply(
        &self,
        booking_id: i64,
        command: BookingCommand,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let booking = db::fetch_booking(&self.db, booking_id)
            .await?
            .ok_or(BookingError::NotFound("booking"))?;
        let salon = db::fetch_salon(&self.db, booking.salon_id)
            .await?
            .ok_or(BookingError::NotFound("salon"))?;

        authorize(actor, command, &booking, &salon)?;

        let from = booking.status();
        let to = from.apply(command)?;
        if command == BookingCommand::Verify
            && booking.created_at < self.policy.unpaid_before(now.naive_utc())
        {
            return Err(self.expire_late_payment(&booking, now).await?);
        }
        if command == BookingCommand::Complete && salon.local_time(now) <= booking.end_at {
            return Err(BookingError::Validation("booking has not ended yet".into()));
        }

        if !compare_and_set(&self.db, booking.id, from, to, now).await? {
            let current = db::fetch_booking(&self.db, booking.id)
                .await?
                .ok_or(BookingError::NotFound("booking"))?;
            tracing::info!(booking_id, "lost transition race, now {}", current.status);
            return Err(BookingError::AlreadyProcessed {
                status: current.status(),
            });
        }

        let updated = db::fetch_booking(&self.db, booking.id)
            .await?
            .ok_or(BookingError::NotFound("booking"))?;
        tracing::info!(booking_id, ?actor, "booking {} → {}", from.as_str(), to.as_str());

        let text = match to {
            BookingStatus::Verified => Some(notify::booking_verified(&updated)),
            BookingStatus::Cancelled => Some(notify::booking_cancelled(&updated)),
            _ => None,
        };
        if let Some(text) = text {
            let notifier = self.notifier.as_ref();
            let limit = self.policy.delivery_timeout;
            notify::dispatch(notifier, salon.contact_chat_id, &text, limit).await;
            notify::dispatch(notifier, Some(updated.customer_tg_id), &text, limit).await;
        }

        Ok(updated)
    }

    /// A confirmation for a PENDING booking past its payment deadline. The
    /// booking is released instead, exactly as the sweep would have done.
    async fn expire_late_payment(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<BookingError, BookingError> {
        let target = self.policy.expired_status;
        let status = if compare_and_set(&self.db, booking.id, BookingStatus::Pending, target, now)
            .await?
        {
            tracing::warn!(booking_id = booking.id, "confirmation arrived after the payment deadline");
            announce_expired(
                &self.db,
                self.notifier.as_ref(),
                booking.id,
                self.policy.delivery_timeout,
            )
            .await;
            target
        } else {
            db::fetch_booking(&self.db, booking.id)
                .await?
                .ok_or(BookingError::NotFound("booking"))?
                .status()
        };
        Ok(BookingError::AlreadyProcessed { status })
    }
}

// ── Tests ──
