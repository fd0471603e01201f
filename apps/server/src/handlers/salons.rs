use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::error::BookingError;
use crate::models::*;
use crate::{db, schedule, slots, AppState};

/// Parse `"3,7"` into service ids.
fn parse_service_ids(raw: &str) -> Result<Vec<i64>, BookingError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| BookingError::Validation(format!("bad service id {s:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(BookingError::Validation("service_ids is empty".into()));
    }
    Ok(ids)
}

/// GET /api/salons/{salon_id}/slots?employee_id=&service_ids=&date= — bookable starts.
pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    Path(salon_id): Path<i64>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<ApiResponse<SlotsResponse>>, BookingError> {
    let service_ids = parse_service_ids(&query.service_ids)?;

    let salon = db::fetch_salon(&state.db, salon_id)
        .await?
        .ok_or(BookingError::NotFound("salon"))?;
    let employee = db::fetch_employee(&state.db, query.employee_id)
        .await?
        .filter(|e| e.salon_id == salon.id)
        .ok_or(BookingError::NotFound("employee"))?;
    let services = db::fetch_services(&state.db, salon.id, &service_ids).await?;
    if services.len() != service_ids.len() {
        return Err(BookingError::NotFound("service"));
    }

    let offered = slots::slots_for(
        &state.db,
        &salon,
        &employee,
        &services,
        query.date,
        salon.local_time(Utc::now()),
        &state.config.booking,
    )
    .await?;

    Ok(Json(ApiResponse::success(SlotsResponse {
        date: query.date,
        employee_id: employee.id,
        duration_min: slots::required_duration(&services).num_minutes(),
        slots: offered,
    })))
}

/// GET /api/salons/{salon_id}/status — is the salon open right now.
pub async fn salon_status(
    State(state): State<Arc<AppState>>,
    Path(salon_id): Path<i64>,
) -> Result<Json<ApiResponse<SalonStatusResponse>>, BookingError> {
    let salon = db::fetch_salon(&state.db, salon_id)
        .await?
        .ok_or(BookingError::NotFound("salon"))?;
    let rows = db::fetch_operating_hours(&state.db, salon.id).await?;

    let local = salon.local_time(Utc::now());
    let open_now = salon.is_active && schedule::is_open_at(&schedule::salon_hours(&salon, &rows), local);

    Ok(Json(ApiResponse::success(SalonStatusResponse {
        salon_id: salon.id,
        open_now,
        local_time: local.format("%Y-%m-%d %H:%M").to_string(),
    })))
}
