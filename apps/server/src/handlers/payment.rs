use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::auth::{self, SIGNATURE_HEADER};
use crate::booking::{Actor, BookingCommand};
use crate::error::BookingError;
use crate::models::*;
use crate::AppState;

/// POST /api/payments/confirmed — the payment provider reports a received deposit.
///
/// The raw body must carry a valid `X-Signature`. Repeated deliveries for an
/// already-processed booking answer 200 with the current status so the
/// provider stops retrying.
pub async fn payment_confirmed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<BookingStatusResponse>>, BookingError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !auth::verify_signature(&state.config.payment_webhook_secret, &body, signature) {
        tracing::warn!("payment callback with bad signature");
        return Err(BookingError::Unauthorized("bad signature"));
    }

    let event: PaymentConfirmation = serde_json::from_slice(&body)
        .map_err(|e| BookingError::Validation(format!("bad payment payload: {e}")))?;
    tracing::info!(
        booking_id = event.booking_id,
        payment_id = event.payment_id.as_deref().unwrap_or("-"),
        "deposit confirmed by provider"
    );

    let status = match state
        .bookings
        .apply(
            event.booking_id,
            BookingCommand::Verify,
            Actor::PaymentWebhook,
            Utc::now(),
        )
        .await
    {
        Ok(booking) => booking.status,
        Err(BookingError::AlreadyProcessed { status }) => {
            tracing::info!(
                booking_id = event.booking_id,
                "payment callback for a booking already {}",
                status.as_str()
            );
            status.as_str().to_string()
        }
        Err(e) => return Err(e),
    };

    Ok(Json(ApiResponse::success(BookingStatusResponse {
        booking_id: event.booking_id,
        status,
    })))
}
