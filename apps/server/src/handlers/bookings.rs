use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::booking::{Actor, BookingCommand};
use crate::error::BookingError;
use crate::models::*;
use crate::{auth, db, AppState};

fn customer(state: &AppState, headers: &HeaderMap) -> Result<TelegramUser, BookingError> {
    auth::user_from_headers(headers, &state.config.bot_token, Utc::now().timestamp())
}

/// POST /api/bookings — reserve a slot, pending deposit.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> Result<Json<ApiResponse<BookingReceipt>>, BookingError> {
    let user = customer(&state, &headers)?;
    let booking = state.bookings.create(&body, &user, Utc::now()).await?;
    Ok(Json(ApiResponse::success(BookingReceipt::from(&booking))))
}

/// GET /api/bookings/my — the caller's pending and verified bookings.
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<BookingReceipt>>>, BookingError> {
    let user = customer(&state, &headers)?;
    let bookings = db::fetch_customer_bookings(&state.db, user.id).await?;
    Ok(Json(ApiResponse::success(
        bookings.iter().map(BookingReceipt::from).collect(),
    )))
}

/// POST /api/bookings/{id}/cancel — customer cancels their own booking.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BookingStatusResponse>>, BookingError> {
    let user = customer(&state, &headers)?;
    let booking = state
        .bookings
        .apply(id, BookingCommand::Cancel, Actor::Customer(user.id), Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(BookingStatusResponse {
        booking_id: booking.id,
        status: booking.status,
    })))
}

/// GET /api/bookings/{id}/status — poll while waiting for the deposit.
pub async fn booking_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BookingStatusResponse>>, BookingError> {
    let user = customer(&state, &headers)?;
    let booking = db::fetch_booking(&state.db, id)
        .await?
        .filter(|b| b.customer_tg_id == user.id)
        .ok_or(BookingError::NotFound("booking"))?;
    Ok(Json(ApiResponse::success(BookingStatusResponse {
        booking_id: booking.id,
        status: booking.status,
    })))
}
