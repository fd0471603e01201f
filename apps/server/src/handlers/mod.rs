pub mod bookings;
pub mod health;
pub mod owner;
pub mod payment;
pub mod salons;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    // Public: health, availability, payment provider callback
    let public_routes = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/salons/{salon_id}/slots", get(salons::available_slots))
        .route("/api/salons/{salon_id}/status", get(salons::salon_status))
        .route("/api/payments/confirmed", post(payment::payment_confirmed));

    // Customer: Telegram-authenticated
    let customer_routes = Router::new()
        .route("/api/bookings", post(bookings::create_booking))
        .route("/api/bookings/my", get(bookings::my_bookings))
        .route("/api/bookings/{id}/cancel", post(bookings::cancel_booking))
        .route("/api/bookings/{id}/status", get(bookings::booking_status));

    // Owner: Telegram-authenticated, ownership checked per salon
    let owner_routes = Router::new()
        .route("/api/owner/bookings/{id}/actions", post(owner::booking_action))
        .route(
            "/api/owner/salons/{salon_id}/employees",
            post(owner::create_employee),
        );

    Router::new()
        .merge(public_routes)
        .merge(customer_routes)
        .merge(owner_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use std::time::Instant;
    use tower::ServiceExt;

    use crate::auth::testing::{sign, tma_header};
    use crate::booking::BookingManager;
    use crate::config::Config;
    use crate::db::testutil;
    use crate::notify::testing::RecordingNotifier;

    const OWNER: i64 = 1000;
    const CUSTOMER: i64 = 42;

    struct TestApp {
        state: Arc<AppState>,
        salon_id: i64,
        employee_id: i64,
        service_id: i64,
    }

    async fn test_app() -> TestApp {
        let pool = testutil::pool().await;
        let salon_id = testutil::salon(&pool, 50).await;
        let employee_id = testutil::employee(&pool, salon_id, "00:00-23:59").await;
        let service_id = testutil::service(&pool, salon_id, 30, 10, 25000).await;
        sqlx::query("UPDATE salons SET opening_time = '00:00', closing_time = '23:59'")
            .execute(&pool)
            .await
            .unwrap();

        let config = Config::for_tests();
        let bookings = BookingManager::new(
            pool.clone(),
            config.booking.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        TestApp {
            state: Arc::new(AppState {
                db: pool,
                config,
                bookings,
                started_at: Instant::now(),
            }),
            salon_id,
            employee_id,
            service_id,
        }
    }

    fn auth(user_id: i64) -> String {
        tma_header("123:test", user_id, Utc::now().timestamp())
    }

    async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
        let res = router(app.state.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, user_id: Option<i64>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = user_id {
            builder = builder.header(header::AUTHORIZATION, auth(id));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, user_id: Option<i64>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(id) = user_id {
            builder = builder.header(header::AUTHORIZATION, auth(id));
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Books the first slot offered two days from now.
    async fn book(app: &TestApp) -> (i64, Value) {
        let date = (Utc::now() + Duration::days(2)).date_naive();
        let (status, body) = send(
            app,
            post_json(
                "/api/bookings",
                Some(CUSTOMER),
                json!({
                    "salon_id": app.salon_id,
                    "employee_id": app.employee_id,
                    "service_ids": [app.service_id],
                    "date": date,
                    "start_time": "10:00",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (body["data"]["booking_id"].as_i64().unwrap(), body)
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let (status, body) = send(&app, get("/api/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pending_bookings"], 0);
    }

    #[tokio::test]
    async fn test_slots_endpoint() {
        let app = test_app().await;
        let date = (Utc::now() + Duration::days(2)).date_naive();
        let uri = format!(
            "/api/salons/{}/slots?employee_id={}&service_ids={}&date={}",
            app.salon_id, app.employee_id, app.service_id, date
        );
        let (status, body) = send(&app, get(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["duration_min"], 40);
        let slots = body["data"]["slots"].as_array().unwrap();
        assert_eq!(slots[0]["value"], "00:00");
        assert_eq!(slots[0]["label"], "12:00 AM");
    }

    #[tokio::test]
    async fn test_slots_unknown_service() {
        let app = test_app().await;
        let uri = format!(
            "/api/salons/{}/slots?employee_id={}&service_ids=999&date=2030-01-07",
            app.salon_id, app.employee_id
        );
        let (status, body) = send(&app, get(&uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_salon_status() {
        let app = test_app().await;
        let (status, body) =
            send(&app, get(&format!("/api/salons/{}/status", app.salon_id), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["open_now"].is_boolean());
    }

    #[tokio::test]
    async fn test_booking_requires_auth() {
        let app = test_app().await;
        let body = json!({
            "salon_id": app.salon_id,
            "employee_id": app.employee_id,
            "service_ids": [app.service_id],
            "date": "2030-01-07",
            "start_time": "10:00",
        });
        let (status, _) = send(&app, post_json("/api/bookings", None, body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, get("/api/bookings/my", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_book_then_conflict() {
        let app = test_app().await;
        let (_, body) = book(&app).await;
        assert_eq!(body["data"]["deposit_amount"], 12500);
        assert_eq!(body["data"]["status"], "pending");

        let date = (Utc::now() + Duration::days(2)).date_naive();
        let (status, body) = send(
            &app,
            post_json(
                "/api/bookings",
                Some(CUSTOMER + 1),
                json!({
                    "salon_id": app.salon_id,
                    "employee_id": app.employee_id,
                    "service_ids": [app.service_id],
                    "date": date,
                    "start_time": "10:30",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "the selected time is no longer available");

        let (status, body) = send(&app, get("/api/bookings/my", Some(CUSTOMER))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_owner_actions() {
        let app = test_app().await;
        let (id, _) = book(&app).await;
        let uri = format!("/api/owner/bookings/{id}/actions");

        let (status, _) = send(&app, post_json(&uri, Some(CUSTOMER), json!({"action": "verify"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, post_json(&uri, Some(OWNER), json!({"action": "verify"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "verified");

        let (status, body) = send(&app, post_json(&uri, Some(OWNER), json!({"action": "verify"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "booking already processed (status: verified)");

        let (status, _) = send(&app, post_json(&uri, Some(OWNER), json!({"action": "refund"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_customer_cancel_and_status() {
        let app = test_app().await;
        let (id, _) = book(&app).await;

        let (status, _) =
            send(&app, post_json(&format!("/api/bookings/{id}/cancel"), Some(CUSTOMER + 1), json!({}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app, post_json(&format!("/api/bookings/{id}/cancel"), Some(CUSTOMER), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");

        let (status, body) = send(&app, get(&format!("/api/bookings/{id}/status"), Some(CUSTOMER))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");

        let (status, _) = send(&app, get(&format!("/api/bookings/{id}/status"), Some(7))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_payment_callback() {
        let app = test_app().await;
        let (id, _) = book(&app).await;
        let payload = json!({"booking_id": id, "payment_id": "pay_1"}).to_string();

        let unsigned = Request::builder()
            .method("POST")
            .uri("/api/payments/confirmed")
            .header("X-Signature", "00")
            .body(Body::from(payload.clone()))
            .unwrap();
        let (status, _) = send(&app, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        for _ in 0..2 {
            let signed = Request::builder()
                .method("POST")
                .uri("/api/payments/confirmed")
                .header("X-Signature", sign("whsec", payload.as_bytes()))
                .body(Body::from(payload.clone()))
                .unwrap();
            let (status, body) = send(&app, signed).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["status"], "verified");
        }
    }

    #[tokio::test]
    async fn test_create_employee() {
        let app = test_app().await;
        let uri = format!("/api/owner/salons/{}/employees", app.salon_id);

        let (status, _) = send(&app, post_json(&uri, Some(CUSTOMER), json!({"name": "Lucia"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            post_json(&uri, Some(OWNER), json!({"name": "Lucia", "lunch_start": "13:00"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            post_json(
                &uri,
                Some(OWNER),
                json!({"name": "Lucia", "lunch_start": "13:00", "lunch_end": "14:00"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Lucia");
        assert_eq!(body["data"]["salon_id"], app.salon_id);
    }
}
