use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::booking::Actor;
use crate::error::BookingError;
use crate::models::*;
use crate::{auth, db, schedule, AppState};

/// POST /api/owner/bookings/{id}/actions — `{"action": "verify" | "cancel" | "complete"}`.
pub async fn booking_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<BookingActionRequest>,
) -> Result<Json<ApiResponse<BookingStatusResponse>>, BookingError> {
    let now = Utc::now();
    let user = auth::user_from_headers(&headers, &state.config.bot_token, now.timestamp())?;
    let booking = state
        .bookings
        .apply(id, body.action, Actor::Owner(user.id), now)
        .await?;
    Ok(Json(ApiResponse::success(BookingStatusResponse {
        booking_id: booking.id,
        status: booking.status,
    })))
}

/// POST /api/owner/salons/{salon_id}/employees — add staff with the default week.
pub async fn create_employee(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(salon_id): Path<i64>,
    Json(body): Json<CreateEmployeeRequest>,
) -> Result<Json<ApiResponse<Employee>>, BookingError> {
    let user = auth::user_from_headers(&headers, &state.config.bot_token, Utc::now().timestamp())?;
    let salon = db::fetch_salon(&state.db, salon_id)
        .await?
        .ok_or(BookingError::NotFound("salon"))?;
    if !auth::is_owner(&user, &salon) {
        return Err(BookingError::Permission);
    }

    if body.name.trim().is_empty() {
        return Err(BookingError::Validation("employee name is required".into()));
    }
    match (&body.lunch_start, &body.lunch_end) {
        (None, None) => {}
        (Some(start), Some(end)) => {
            let lunch = schedule::parse_time_of_day(start)
                .and_then(|s| schedule::TimeWindow::new(s, schedule::parse_time_of_day(end)?))
                .map_err(|e| BookingError::Validation(format!("lunch break: {e}")))?;
            if lunch.is_overnight() {
                return Err(BookingError::Validation(
                    "lunch break must end after it starts".into(),
                ));
            }
        }
        _ => {
            return Err(BookingError::Validation(
                "lunch_start and lunch_end go together".into(),
            ))
        }
    }

    let employee = db::create_employee(&state.db, salon.id, &body).await?;
    tracing::info!(salon_id, employee_id = employee.id, "employee created");
    Ok(Json(ApiResponse::success(employee)))
}
