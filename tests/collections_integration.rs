use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::test::TestRequest;
use actix_web::{App, HttpMessage, test, web};
use chrono::Duration;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::cell::Cell;
use std::rc::Rc;

use wastewise::api::auth::AuthUser;
use wastewise::collections::weekday_index;
use wastewise::models::Role;
use wastewise::{api, local_today};

mod support;

macro_rules! api_app {
    ($state:expr, $caller:expr) => {{
        let caller: Rc<Cell<AuthUser>> = $caller.clone();
        test::init_service(
            App::new()
                .app_data($state.clone())
                .service(
                    web::scope("/api")
                        .wrap_fn(move |req, srv| {
                            req.extensions_mut().insert(caller.get());
                            let fut = srv.call(req);
                            async move { fut.await }
                        })
                        .configure(api::protected),
                ),
        )
        .await
    }};
}

async fn read_json<B: MessageBody>(resp: ServiceResponse<B>) -> Value {
    let body = test::read_body(resp).await;
    serde_json::from_slice(&body).expect("json body")
}

async fn seed_schedule(pool: &PgPool, barangay_id: i32, weekday: i16) -> i32 {
    sqlx::query_scalar(
        r#"INSERT INTO collection_schedules (barangay_id, weekday, waste_type, start_time, end_time)
           VALUES ($1, $2, 'biodegradable', '06:00', '09:00')
           RETURNING id"#,
    )
    .bind(barangay_id)
    .bind(weekday)
    .fetch_one(pool)
    .await
    .expect("insert schedule")
}

fn status_update(schedule_id: i32, status: &str) -> TestRequest {
    TestRequest::put()
        .uri(&format!("/api/collector/schedules/{schedule_id}/status"))
        .set_json(json!({ "status": status, "note": "truck 3" }))
}

#[actix_web::test]
async fn collector_updates_todays_status_for_assigned_barangay() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let today = local_today();
    let barangay_id = support::seed_barangay(pool, "Batasan Hills").await;
    let other_barangay = support::seed_barangay(pool, "Culiat").await;
    let resident_id = support::seed_resident(pool, barangay_id, "approved").await;
    let (collector_user, _) = support::seed_collector(pool, Some(barangay_id)).await;

    let todays = seed_schedule(pool, barangay_id, weekday_index(today)).await;
    let tomorrows = seed_schedule(pool, barangay_id, weekday_index(today + Duration::days(1))).await;
    let elsewhere = seed_schedule(pool, other_barangay, weekday_index(today)).await;

    // A label from last week must not leak into today.
    sqlx::query(
        r#"INSERT INTO collection_status (schedule_id, collection_date, status)
           VALUES ($1, $2, 'collected')"#,
    )
    .bind(todays)
    .bind(today - Duration::days(7))
    .execute(pool)
    .await
    .expect("insert old status");

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let caller = Rc::new(Cell::new(AuthUser { id: resident_id, role: Role::Resident }));
    let app = api_app!(state, caller);

    let resp = test::call_service(&app, TestRequest::get().uri("/api/collections/today").to_request()).await;
    assert!(resp.status().is_success());
    let days = read_json(resp).await;
    assert_eq!(days.as_array().map(Vec::len), Some(1));
    assert_eq!(days[0]["id"], todays);
    assert_eq!(days[0]["status"], "pending");
    assert_eq!(days[0]["barangay_name"], "Batasan Hills");

    let resp = test::call_service(&app, TestRequest::get().uri("/api/collections/schedule").to_request()).await;
    let week = read_json(resp).await;
    assert_eq!(week.as_array().map(Vec::len), Some(2));

    caller.set(AuthUser { id: collector_user, role: Role::Collector });

    let resp = test::call_service(&app, TestRequest::get().uri("/api/collector/route").to_request()).await;
    let route = read_json(resp).await;
    assert_eq!(route.as_array().map(Vec::len), Some(1));

    let resp = test::call_service(&app, status_update(tomorrows, "in_progress").to_request()).await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(&app, status_update(elsewhere, "in_progress").to_request()).await;
    assert_eq!(resp.status(), 403);

    let resp = test::call_service(&app, status_update(999_999, "in_progress").to_request()).await;
    assert_eq!(resp.status(), 404);

    let resp = test::call_service(&app, status_update(todays, "in_progress").to_request()).await;
    assert!(resp.status().is_success());
    let resp = test::call_service(&app, status_update(todays, "collected").to_request()).await;
    assert!(resp.status().is_success());
    let day = read_json(resp).await;
    assert_eq!(day["status"], "collected");
    assert_eq!(day["note"], "truck 3");
    assert_eq!(day["collection_date"], today.to_string());

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM collection_status WHERE schedule_id = $1 AND collection_date = $2",
    )
    .bind(todays)
    .bind(today)
    .fetch_one(pool)
    .await
    .expect("status rows");
    assert_eq!(rows, 1);

    caller.set(AuthUser { id: resident_id, role: Role::Resident });
    let resp = test::call_service(&app, TestRequest::get().uri("/api/collections/today").to_request()).await;
    let days = read_json(resp).await;
    assert_eq!(days[0]["status"], "collected");

    // Residents cannot set statuses.
    let resp = test::call_service(&app, status_update(todays, "missed").to_request()).await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
async fn admin_manages_schedules() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let barangay_id = support::seed_barangay(pool, "Pasong Tamo").await;
    let admin_id = support::seed_admin(pool).await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let caller = Rc::new(Cell::new(AuthUser { id: admin_id, role: Role::Admin }));
    let app = api_app!(state, caller);

    let create = |body: Value| {
        TestRequest::post()
            .uri("/api/admin/schedules")
            .set_json(body)
            .to_request()
    };

    let resp = test::call_service(
        &app,
        create(json!({
            "barangay_id": barangay_id,
            "weekday": 2,
            "waste_type": "recyclable",
            "start_time": "07:00",
            "end_time": "10:30"
        })),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let schedule = read_json(resp).await;
    assert_eq!(schedule["waste_type"], "recyclable");
    let schedule_id = schedule["id"].as_i64().expect("schedule id");

    let resp = test::call_service(
        &app,
        create(json!({
            "barangay_id": barangay_id,
            "weekday": 7,
            "waste_type": "recyclable",
            "start_time": "07:00",
            "end_time": "10:30"
        })),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(
        &app,
        create(json!({
            "barangay_id": barangay_id,
            "weekday": 1,
            "waste_type": "residual",
            "start_time": "10:00",
            "end_time": "09:00"
        })),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(
        &app,
        TestRequest::get()
            .uri(&format!("/api/admin/schedules?barangay_id={barangay_id}"))
            .to_request(),
    )
    .await;
    assert_eq!(read_json(resp).await.as_array().map(Vec::len), Some(1));

    let resp = test::call_service(
        &app,
        TestRequest::delete()
            .uri(&format!("/api/admin/schedules/{schedule_id}"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 204);

    let active: bool = sqlx::query_scalar("SELECT is_active FROM collection_schedules WHERE id = $1")
        .bind(schedule_id as i32)
        .fetch_one(pool)
        .await
        .expect("schedule");
    assert!(!active);
}

#[actix_web::test]
async fn live_updates_require_a_resident_token() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let barangay_id = support::seed_barangay(pool, "Fairview").await;
    let (collector_user, _) = support::seed_collector(pool, Some(barangay_id)).await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::public)).await;

    let resp = test::call_service(&app, TestRequest::get().uri("/ws/collections").to_request()).await;
    assert_eq!(resp.status(), 401);

    let resp = test::call_service(
        &app,
        TestRequest::get().uri("/ws/collections?token=garbage").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);

    let token = state
        .jwt
        .issue(collector_user, Role::Collector)
        .expect("token");
    let resp = test::call_service(
        &app,
        TestRequest::get()
            .uri(&format!("/ws/collections?token={token}"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 403);
}
