use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{BookingCommand, BookingStatus};

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Salon {
    pub id: i64,
    pub name: String,
    pub owner_tg_id: i64,
    pub contact_chat_id: Option<i64>,
    pub opening_time: String,
    pub closing_time: String,
    pub works_mon: bool,
    pub works_tue: bool,
    pub works_wed: bool,
    pub works_thu: bool,
    pub works_fri: bool,
    pub works_sat: bool,
    pub works_sun: bool,
    pub deposit_percentage: i64,
    pub utc_offset_minutes: i64,
    pub is_active: bool,
}

impl Salon {
    /// Per-weekday "works this day" flags, Monday first.
    pub fn work_days(&self) -> [bool; 7] {
        [
            self.works_mon,
            self.works_tue,
            self.works_wed,
            self.works_thu,
            self.works_fri,
            self.works_sat,
            self.works_sun,
        ]
    }

    /// Wall-clock time at the salon for the given UTC instant.
    pub fn local_time(&self, utc: DateTime<Utc>) -> NaiveDateTime {
        utc.naive_utc() + Duration::minutes(self.utc_offset_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OperatingHour {
    pub salon_id: i64,
    pub weekday: i64,
    pub open_time: String,
    pub close_time: String,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: i64,
    pub salon_id: i64,
    pub name: String,
    pub tg_id: Option<i64>,
    pub is_active: bool,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
}

/// One `employee_schedules` row. `iso_year`/`iso_week` are 0 for the default week.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleRow {
    pub weekday: i64,
    pub hours: String,
    pub iso_year: i64,
    pub iso_week: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub salon_id: i64,
    pub name: String,
    pub duration_min: i64,
    pub buffer_min: i64,
    pub price: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub salon_id: i64,
    pub employee_id: Option<i64>,
    pub customer_tg_id: i64,
    pub customer_name: String,
    pub customer_username: Option<String>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub total_price: i64,
    pub deposit_amount: i64,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    /// Unknown status strings are treated as terminal so nothing can move them.
    pub fn status(&self) -> BookingStatus {
        BookingStatus::parse(&self.status).unwrap_or(BookingStatus::Cancelled)
    }
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub employee_id: i64,
    /// Comma-separated service ids, e.g. `3,7`.
    pub service_ids: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotOption {
    pub value: String,
    pub label: String,
    pub starts_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub date: NaiveDate,
    pub employee_id: i64,
    pub duration_min: i64,
    pub slots: Vec<SlotOption>,
}

#[derive(Debug, Serialize)]
pub struct SalonStatusResponse {
    pub salon_id: i64,
    pub open_now: bool,
    pub local_time: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub salon_id: i64,
    pub employee_id: i64,
    pub service_ids: Vec<i64>,
    pub date: NaiveDate,
    pub start_time: String,
}

#[derive(Debug, Serialize)]
pub struct BookingReceipt {
    pub booking_id: i64,
    pub deposit_amount: i64,
    pub total_price: i64,
    pub status: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
}

impl From<&Booking> for BookingReceipt {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id,
            deposit_amount: b.deposit_amount,
            total_price: b.total_price,
            status: b.status.clone(),
            start_at: b.start_at,
            end_at: b.end_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingStatusResponse {
    pub booking_id: i64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingActionRequest {
    pub action: BookingCommand,
}

#[derive(Debug, Deserialize)]
pub struct PaymentConfirmation {
    pub booking_id: i64,
    pub payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeRequest {
    pub name: String,
    pub tg_id: Option<i64>,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Telegram auth ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}
