use actix_web::body::MessageBody;
use actix_web::dev::ServiceResponse;
use actix_web::test::TestRequest;
use actix_web::{App, test, web};
use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use wastewise::api::webhooks_paymongo::paymongo_webhook;
use wastewise::billing;

mod support;

/// Approved resident with a fresh `basic` subscription and a pending PayMongo
/// payment for its first invoice. Returns `(user_id, invoice_id, payment_id)`.
async fn seed_checkout(pool: &PgPool, session_id: &str) -> (i32, i32, i32) {
    let barangay_id = support::seed_barangay(pool, "San Isidro").await;
    let user_id = support::seed_resident(pool, barangay_id, "approved").await;
    let today = wastewise::local_today();
    let (_, invoice) = billing::subscribe(pool, user_id, "basic", today, 7)
        .await
        .expect("subscribe");

    let payment_id: i32 = sqlx::query_scalar(
        r#"INSERT INTO payments (invoice_id, user_id, method, provider_reference, amount, currency)
           VALUES ($1, $2, 'paymongo', $3, $4::numeric, $5)
           RETURNING id"#,
    )
    .bind(invoice.id)
    .bind(user_id)
    .bind(session_id)
    .bind(&invoice.amount)
    .bind(&invoice.currency)
    .fetch_one(pool)
    .await
    .expect("insert payment");

    (user_id, invoice.id, payment_id)
}

fn paid_event(event_id: &str, session_id: &str, invoice_id: i32, centavos: i64) -> Value {
    json!({
        "data": {
            "id": event_id,
            "type": "event",
            "attributes": {
                "type": "checkout_session.payment.paid",
                "livemode": false,
                "data": {
                    "id": session_id,
                    "type": "checkout_session",
                    "attributes": {
                        "metadata": { "invoice_id": invoice_id.to_string() },
                        "payments": [{ "id": "pay_1", "attributes": { "amount": centavos } }]
                    }
                }
            }
        }
    })
}

fn signed_request(payload: &Value, secret: &str) -> TestRequest {
    let body = serde_json::to_vec(payload).expect("encode event");
    let timestamp = "1760000000";
    let sig = support::paymongo_signature(secret, timestamp, &body);

    TestRequest::post()
        .uri("/webhook/paymongo")
        .insert_header(("Paymongo-Signature", format!("t={timestamp},te={sig},li=")))
        .insert_header(("content-type", "application/json"))
        .set_payload(body)
}

async fn read_json<B: MessageBody>(resp: ServiceResponse<B>) -> Value {
    let body = test::read_body(resp).await;
    serde_json::from_slice(&body).expect("json body")
}

#[actix_web::test]
async fn paid_event_confirms_payment_and_activates_subscription() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let (user_id, invoice_id, payment_id) = seed_checkout(pool, "cs_paid_1").await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymongo_webhook)).await;

    let event = paid_event("evt_paid_1", "cs_paid_1", invoice_id, 15000);
    let resp = test::call_service(&app, signed_request(&event, support::WEBHOOK_SECRET).to_request()).await;
    assert!(resp.status().is_success());
    let json = read_json(resp).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["payment_id"], payment_id);
    assert_eq!(json["subscription_status"], "active");
    assert!(json["receipt_number"].as_str().is_some_and(|n| n.starts_with("OR-")));

    let invoice_status: String = sqlx::query_scalar("SELECT status FROM invoices WHERE id = $1")
        .bind(invoice_id)
        .fetch_one(pool)
        .await
        .expect("invoice");
    assert_eq!(invoice_status, "paid");

    let payment = sqlx::query("SELECT status, payload FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_one(pool)
        .await
        .expect("payment");
    assert_eq!(payment.get::<String, _>("status"), "confirmed");
    let payload: Value = payment.get("payload");
    assert_eq!(payload["event"]["data"]["id"], "evt_paid_1");

    let subscription_status: String =
        sqlx::query_scalar("SELECT status FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .expect("subscription");
    assert_eq!(subscription_status, "active");

    let receipts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE payment_id = $1")
        .bind(payment_id)
        .fetch_one(pool)
        .await
        .expect("receipts");
    assert_eq!(receipts, 1);
}

#[actix_web::test]
async fn replayed_event_is_idempotent() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let (_, invoice_id, payment_id) = seed_checkout(pool, "cs_replay").await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymongo_webhook)).await;

    let event = paid_event("evt_replay", "cs_replay", invoice_id, 15000);
    let first = test::call_service(&app, signed_request(&event, support::WEBHOOK_SECRET).to_request()).await;
    assert!(first.status().is_success());

    let second = test::call_service(&app, signed_request(&event, support::WEBHOOK_SECRET).to_request()).await;
    assert!(second.status().is_success());
    let json = read_json(second).await;
    assert_eq!(json["idempotent"], true);

    let receipts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE payment_id = $1")
        .bind(payment_id)
        .fetch_one(pool)
        .await
        .expect("receipts");
    assert_eq!(receipts, 1);

    let events: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM webhook_events WHERE provider = 'paymongo' AND event_id = 'evt_replay'",
    )
    .fetch_one(pool)
    .await
    .expect("events");
    assert_eq!(events, 1);
}

#[actix_web::test]
async fn unknown_session_is_acknowledged_and_ignored() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let (_, invoice_id, payment_id) = seed_checkout(pool, "cs_known").await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymongo_webhook)).await;

    let event = paid_event("evt_unknown", "cs_someone_else", invoice_id, 15000);
    let resp = test::call_service(&app, signed_request(&event, support::WEBHOOK_SECRET).to_request()).await;
    assert!(resp.status().is_success());
    let json = read_json(resp).await;
    assert_eq!(json["ignored"], true);

    let status: String = sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_one(pool)
        .await
        .expect("payment");
    assert_eq!(status, "pending");
}

#[actix_web::test]
async fn failed_event_marks_pending_payment_failed() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let (_, invoice_id, payment_id) = seed_checkout(pool, "cs_failing").await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymongo_webhook)).await;

    // The failed resource is a payment, matched through the invoice metadata.
    let event = json!({
        "data": {
            "id": "evt_failed",
            "attributes": {
                "type": "payment.failed",
                "livemode": false,
                "data": {
                    "id": "pay_declined",
                    "attributes": {
                        "amount": 15000,
                        "metadata": { "invoice_id": invoice_id.to_string() }
                    }
                }
            }
        }
    });
    let resp = test::call_service(&app, signed_request(&event, support::WEBHOOK_SECRET).to_request()).await;
    assert!(resp.status().is_success());
    let json = read_json(resp).await;
    assert_eq!(json["payment_id"], payment_id);

    let row = sqlx::query("SELECT p.status, i.status AS invoice_status FROM payments p JOIN invoices i ON i.id = p.invoice_id WHERE p.id = $1")
        .bind(payment_id)
        .fetch_one(pool)
        .await
        .expect("payment");
    assert_eq!(row.get::<String, _>("status"), "failed");
    assert_eq!(row.get::<String, _>("invoice_status"), "unpaid");
}

#[actix_web::test]
async fn bad_signature_is_rejected() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let (_, invoice_id, payment_id) = seed_checkout(pool, "cs_forged").await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymongo_webhook)).await;

    let event = paid_event("evt_forged", "cs_forged", invoice_id, 15000);
    let resp = test::call_service(&app, signed_request(&event, "wrong-secret").to_request()).await;
    assert_eq!(resp.status(), 401);

    let unsigned = TestRequest::post()
        .uri("/webhook/paymongo")
        .set_json(&event)
        .to_request();
    let resp = test::call_service(&app, unsigned).await;
    assert_eq!(resp.status(), 401);

    // A forged header on a body that is not even JSON is still an auth failure.
    let garbage = TestRequest::post()
        .uri("/webhook/paymongo")
        .insert_header(("Paymongo-Signature", "t=1760000000,te=deadbeef,li="))
        .set_payload("{{{ not json")
        .to_request();
    let resp = test::call_service(&app, garbage).await;
    assert_eq!(resp.status(), 401);

    // A test-mode signature does not cover an event claiming to be live.
    let mut live_event = paid_event("evt_live", "cs_forged", invoice_id, 15000);
    live_event["data"]["attributes"]["livemode"] = json!(true);
    let resp = test::call_service(
        &app,
        signed_request(&live_event, support::WEBHOOK_SECRET).to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);

    // Correctly signed but malformed is a client error.
    let body = b"{{{ not json".to_vec();
    let sig = support::paymongo_signature(support::WEBHOOK_SECRET, "1760000000", &body);
    let malformed = TestRequest::post()
        .uri("/webhook/paymongo")
        .insert_header(("Paymongo-Signature", format!("t=1760000000,te={sig},li=")))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, malformed).await;
    assert_eq!(resp.status(), 400);

    let status: String = sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_one(pool)
        .await
        .expect("payment");
    assert_eq!(status, "pending");

    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events")
        .fetch_one(pool)
        .await
        .expect("events");
    assert_eq!(events, 0);
}
