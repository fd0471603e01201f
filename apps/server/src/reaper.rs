//! Periodic sweep over time-driven state: unpaid bookings, finished
//! bookings and unpaid tenant accounts.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::booking::{announce_expired, compare_and_set, BookingStatus};
use crate::config::{AccountPolicy, BookingPolicy};
use crate::notify::{self, Notifier};

/// Rows newly affected by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub completed: usize,
    pub deactivated: usize,
    pub purged: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct Reaper {
    db: SqlitePool,
    bookings: BookingPolicy,
    accounts: AccountPolicy,
    notifier: Arc<dyn Notifier>,
    running: Mutex<()>,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> NaiveDateTime {
    (now.naive_utc() - age).trunc_subsecs(0)
}

impl Reaper {
    pub fn new(
        db: SqlitePool,
        bookings: BookingPolicy,
        accounts: AccountPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            bookings,
            accounts,
            notifier,
            running: Mutex::new(()),
        }
    }

    /// Run every phase once. Returns `None` if another sweep is in progress.
    ///
    /// Phases are independent: a failing phase is logged and the rest still run.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Option<SweepReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("sweep already running, skipping");
            return None;
        };

        let mut report = SweepReport {
            expired: self.expire_unpaid(now).await,
            ..SweepReport::default()
        };
        if self.bookings.auto_complete {
            report.completed = self.complete_finished(now).await;
        }
        report.deactivated = self.deactivate_unpaid_owners(now).await;
        report.purged = self.purge_deactivated_owners(now).await;

        if !report.is_empty() {
            tracing::info!(
                expired = report.expired,
                completed = report.completed,
                deactivated = report.deactivated,
                purged = report.purged,
                "sweep finished"
            );
        }
        Some(report)
    }

    /// PENDING bookings older than the payment deadline.
    async fn expire_unpaid(&self, now: DateTime<Utc>) -> usize {
        let ids: Vec<i64> = match sqlx::query_scalar(
            "SELECT id FROM bookings WHERE status = 'pending' AND created_at < ? ORDER BY id",
        )
        .bind(self.bookings.unpaid_before(now.naive_utc()))
        .fetch_all(&self.db)
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("expire phase: listing stale bookings failed: {}", e);
                return 0;
            }
        };

        let target = self.bookings.expired_status;
        let mut expired = 0;
        for booking_id in ids {
            match compare_and_set(&self.db, booking_id, BookingStatus::Pending, target, now).await {
                Ok(true) => {
                    expired += 1;
                    tracing::info!(booking_id, "expired unpaid booking");
                    announce_expired(
                        &self.db,
                        self.notifier.as_ref(),
                        booking_id,
                        self.bookings.delivery_timeout,
                    )
                    .await;
                }
                Ok(false) => tracing::debug!(booking_id, "booking moved on before expiry"),
                Err(e) => tracing::warn!(booking_id, "expire failed: {}", e),
            }
        }
        expired
    }

    /// VERIFIED bookings whose end has passed in salon-local time.
    async fn complete_finished(&self, now: DateTime<Utc>) -> usize {
        let rows: Vec<(i64, NaiveDateTime, i64)> = match sqlx::query_as(
            "SELECT b.id, b.end_at, s.utc_offset_minutes
             FROM bookings b JOIN salons s ON s.id = b.salon_id
             WHERE b.status = 'verified'",
        )
        .fetch_all(&self.db)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("complete phase: listing bookings failed: {}", e);
                return 0;
            }
        };

        let mut completed = 0;
        for (booking_id, end_at, offset) in rows {
            if now.naive_utc() + Duration::minutes(offset) <= end_at {
                continue;
            }
            match compare_and_set(
                &self.db,
                booking_id,
                BookingStatus::Verified,
                BookingStatus::Completed,
                now,
            )
            .await
            {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(booking_id, "auto-complete failed: {}", e),
            }
        }
        completed
    }

    /// Owners who never paid within the soft deadline lose access, and their
    /// salon stops taking bookings.
    async fn deactivate_unpaid_owners(&self, now: DateTime<Utc>) -> usize {
        let rows: Vec<(i64, i64, Option<i64>)> = match sqlx::query_as(
            "SELECT id, tg_id, salon_id FROM owner_accounts
             WHERE verified_payment = 0 AND is_active = 1 AND registered_at < ?",
        )
        .bind(cutoff(now, self.accounts.soft_deadline))
        .fetch_all(&self.db)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("deactivate phase: listing accounts failed: {}", e);
                return 0;
            }
        };

        let mut deactivated = 0;
        for (account_id, tg_id, salon_id) in rows {
            match self.deactivate(account_id, salon_id, now).await {
                Ok(true) => {
                    deactivated += 1;
                    tracing::info!(account_id, ?salon_id, "deactivated unpaid owner account");
                    notify::dispatch(
                        self.notifier.as_ref(),
                        Some(tg_id),
                        &notify::account_deactivated(),
                        self.bookings.delivery_timeout,
                    )
                    .await;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(account_id, "deactivation failed: {}", e),
            }
        }
        deactivated
    }

    async fn deactivate(
        &self,
        account_id: i64,
        salon_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.db.begin().await?;
        let changed = sqlx::query(
            "UPDATE owner_accounts SET is_active = 0, deactivated_at = ?
             WHERE id = ? AND is_active = 1 AND verified_payment = 0",
        )
        .bind(now.naive_utc().trunc_subsecs(0))
        .bind(account_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if changed == 0 {
            return Ok(false);
        }
        if let Some(salon_id) = salon_id {
            sqlx::query("UPDATE salons SET is_active = 0 WHERE id = ?")
                .bind(salon_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Accounts still unpaid long after deactivation are removed for good,
    /// salon included.
    async fn purge_deactivated_owners(&self, now: DateTime<Utc>) -> usize {
        let rows: Vec<(i64, Option<i64>)> = match sqlx::query_as(
            "SELECT id, salon_id FROM owner_accounts
             WHERE verified_payment = 0 AND is_active = 0
             AND deactivated_at IS NOT NULL AND deactivated_at < ?",
        )
        .bind(cutoff(now, self.accounts.hard_deadline))
        .fetch_all(&self.db)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("purge phase: listing accounts failed: {}", e);
                return 0;
            }
        };

        let mut purged = 0;
        for (account_id, salon_id) in rows {
            match self.purge(account_id, salon_id).await {
                Ok(true) => {
                    purged += 1;
                    tracing::warn!(account_id, ?salon_id, "purged unpaid owner account");
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(account_id, "purge failed: {}", e),
            }
        }
        purged
    }

    async fn purge(&self, account_id: i64, salon_id: Option<i64>) -> Result<bool, sqlx::Error> {
        let mut tx = self.db.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM owner_accounts WHERE id = ? AND is_active = 0 AND verified_payment = 0",
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if removed == 0 {
            return Ok(false);
        }
        if let Some(salon_id) = salon_id {
            sqlx::query("DELETE FROM salons WHERE id = ?")
                .bind(salon_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}

/// Sweep forever on a fixed cadence.
pub async fn run(reaper: Arc<Reaper>, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reaper.sweep(Utc::now()).await;
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, testutil};
    use crate::notify::testing::{FailingNotifier, HangingNotifier, RecordingNotifier};

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap().and_utc()
    }

    fn reaper(pool: &SqlitePool, policy: BookingPolicy, notifier: Arc<dyn Notifier>) -> Reaper {
        Reaper::new(pool.clone(), policy, AccountPolicy::default(), notifier)
    }

    async fn insert_booking(
        pool: &SqlitePool,
        salon_id: i64,
        status: &str,
        created_at: &str,
        start_at: &str,
        end_at: &str,
    ) -> i64 {
        sqlx::query(
            "INSERT INTO bookings (salon_id, employee_id, customer_tg_id, customer_name,
             start_at, end_at, total_price, deposit_amount, status, created_at, updated_at)
             VALUES (?, NULL, 42, 'Eva', ?, ?, 25000, 12500, ?, ?, ?)",
        )
        .bind(salon_id)
        .bind(start_at)
        .bind(end_at)
        .bind(status)
        .bind(created_at)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn status_of(pool: &SqlitePool, booking_id: i64) -> String {
        sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
            .bind(booking_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn insert_owner(pool: &SqlitePool, salon_id: i64, registered_at: &str, paid: bool) -> i64 {
        sqlx::query(
            "INSERT INTO owner_accounts (tg_id, salon_id, verified_payment, registered_at)
             VALUES (1000, ?, ?, ?)",
        )
        .bind(salon_id)
        .bind(paid)
        .bind(registered_at)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    // ── bookings ──

    #[tokio::test]
    async fn test_expiry_respects_deadline() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let id = insert_booking(
            &pool,
            salon_id,
            "pending",
            "2025-06-15 10:00:00",
            "2025-06-16 10:00:00",
            "2025-06-16 10:40:00",
        )
        .await;
        let r = reaper(&pool, BookingPolicy::default(), Arc::new(RecordingNotifier::default()));

        let early = r.sweep(utc("2025-06-15 10:59")).await.unwrap();
        assert_eq!(early.expired, 0);
        assert_eq!(status_of(&pool, id).await, "pending");

        let late = r.sweep(utc("2025-06-15 11:01")).await.unwrap();
        assert_eq!(late.expired, 1);
        assert_eq!(status_of(&pool, id).await, "expired");
    }

    #[tokio::test]
    async fn test_expiry_can_use_cancelled() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let id = insert_booking(
            &pool,
            salon_id,
            "pending",
            "2025-06-15 10:00:00",
            "2025-06-16 10:00:00",
            "2025-06-16 10:40:00",
        )
        .await;
        let policy = BookingPolicy {
            expired_status: BookingStatus::Cancelled,
            ..BookingPolicy::default()
        };
        let r = reaper(&pool, policy, Arc::new(RecordingNotifier::default()));

        r.sweep(utc("2025-06-15 11:01")).await.unwrap();
        assert_eq!(status_of(&pool, id).await, "cancelled");
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        for _ in 0..3 {
            insert_booking(
                &pool,
                salon_id,
                "pending",
                "2025-06-15 10:00:00",
                "2025-06-16 10:00:00",
                "2025-06-16 10:40:00",
            )
            .await;
        }
        let notifier = Arc::new(RecordingNotifier::default());
        let r = reaper(&pool, BookingPolicy::default(), notifier.clone());
        let now = utc("2025-06-15 12:00");

        assert_eq!(r.sweep(now).await.unwrap().expired, 3);
        let after_first = notifier.messages().len();
        // customer + salon contact per booking
        assert_eq!(after_first, 6);

        let second = r.sweep(now).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(notifier.messages().len(), after_first);
    }

    #[tokio::test]
    async fn test_verified_and_terminal_bookings_untouched() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let verified = insert_booking(
            &pool,
            salon_id,
            "verified",
            "2025-06-15 10:00:00",
            "2025-06-16 10:00:00",
            "2025-06-16 10:40:00",
        )
        .await;
        let cancelled = insert_booking(
            &pool,
            salon_id,
            "cancelled",
            "2025-06-15 10:00:00",
            "2025-06-16 10:00:00",
            "2025-06-16 10:40:00",
        )
        .await;
        let r = reaper(&pool, BookingPolicy::default(), Arc::new(RecordingNotifier::default()));

        let report = r.sweep(utc("2025-06-17 00:00")).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(status_of(&pool, verified).await, "verified");
        assert_eq!(status_of(&pool, cancelled).await, "cancelled");
    }

    #[tokio::test]
    async fn test_auto_complete_after_end() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let id = insert_booking(
            &pool,
            salon_id,
            "verified",
            "2025-06-15 10:00:00",
            "2025-06-16 10:00:00",
            "2025-06-16 10:40:00",
        )
        .await;
        let policy = BookingPolicy {
            auto_complete: true,
            ..BookingPolicy::default()
        };
        let r = reaper(&pool, policy, Arc::new(RecordingNotifier::default()));

        assert_eq!(r.sweep(utc("2025-06-16 10:30")).await.unwrap().completed, 0);
        assert_eq!(r.sweep(utc("2025-06-16 10:45")).await.unwrap().completed, 1);
        assert_eq!(status_of(&pool, id).await, "completed");
    }

    #[tokio::test]
    async fn test_failed_notifications_do_not_block_sweep() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let id = insert_booking(
            &pool,
            salon_id,
            "pending",
            "2025-06-15 10:00:00",
            "2025-06-16 10:00:00",
            "2025-06-16 10:40:00",
        )
        .await;
        insert_owner(&pool, salon_id, "2025-06-10 00:00:00", false).await;
        let r = reaper(&pool, BookingPolicy::default(), Arc::new(FailingNotifier));

        let report = r.sweep(utc("2025-06-15 12:00")).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.deactivated, 1);
        assert_eq!(status_of(&pool, id).await, "expired");
    }

    #[tokio::test]
    async fn test_silent_notifier_does_not_stall_sweep() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let id = insert_booking(
            &pool,
            salon_id,
            "pending",
            "2025-06-15 10:00:00",
            "2025-06-16 10:00:00",
            "2025-06-16 10:40:00",
        )
        .await;
        insert_owner(&pool, salon_id, "2025-06-10 00:00:00", false).await;
        let policy = BookingPolicy {
            delivery_timeout: std::time::Duration::from_millis(50),
            ..BookingPolicy::default()
        };
        let r = reaper(&pool, policy, Arc::new(HangingNotifier));
        let now = utc("2025-06-15 12:00");

        let report = tokio::time::timeout(std::time::Duration::from_secs(2), r.sweep(now))
            .await
            .expect("sweep stalled on delivery")
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.deactivated, 1);
        assert_eq!(status_of(&pool, id).await, "expired");

        // the sweep lock was released
        assert!(r.sweep(now).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_sweep_is_skipped() {
        let pool = testutil::pool().await;
        let r = reaper(&pool, BookingPolicy::default(), Arc::new(RecordingNotifier::default()));

        let _held = r.running.lock().await;
        assert!(r.sweep(utc("2025-06-15 12:00")).await.is_none());
    }

    // ── accounts ──

    #[tokio::test]
    async fn test_unpaid_owner_lifecycle() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let account = insert_owner(&pool, salon_id, "2025-06-10 08:00:00", false).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let r = reaper(&pool, BookingPolicy::default(), notifier.clone());

        // within 24h: nothing
        assert!(r.sweep(utc("2025-06-11 07:00")).await.unwrap().is_empty());

        let soft = r.sweep(utc("2025-06-11 09:00")).await.unwrap();
        assert_eq!(soft.deactivated, 1);
        assert_eq!(notifier.messages(), vec![(1000, notify::account_deactivated())]);
        let salon = db::fetch_salon(&pool, salon_id).await.unwrap().unwrap();
        assert!(!salon.is_active);

        // deactivated 2025-06-11 09:00; purge only after 72h more
        assert!(r.sweep(utc("2025-06-14 08:00")).await.unwrap().is_empty());

        let hard = r.sweep(utc("2025-06-14 10:00")).await.unwrap();
        assert_eq!(hard.purged, 1);
        assert!(db::fetch_salon(&pool, salon_id).await.unwrap().is_none());
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM owner_accounts WHERE id = ?")
            .bind(account)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left, 0);

        assert!(r.sweep(utc("2025-06-14 10:00")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paid_owner_is_kept() {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        insert_owner(&pool, salon_id, "2025-01-01 00:00:00", true).await;
        let r = reaper(&pool, BookingPolicy::default(), Arc::new(RecordingNotifier::default()));

        assert!(r.sweep(utc("2025-06-15 12:00")).await.unwrap().is_empty());
        assert!(db::fetch_salon(&pool, salon_id).await.unwrap().unwrap().is_active);
    }
}
