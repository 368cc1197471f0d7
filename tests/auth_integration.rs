use actix_web::dev::ServiceResponse;
use actix_web::http::StatusCode;
use actix_web::test::TestRequest;
use actix_web::{App, test, web};
use serde_json::{json, Value};

use wastewise::api;
use wastewise::api::auth::JwtMiddleware;
use wastewise::models::Role;

mod support;

// The middleware rejects with an error rather than a response.
fn status_of<B>(result: Result<ServiceResponse<B>, actix_web::Error>) -> StatusCode {
    match result {
        Ok(resp) => resp.status(),
        Err(e) => e.as_response_error().status_code(),
    }
}

#[actix_web::test]
async fn protected_routes_need_a_bearer_token() {
    let Some(test_db) = support::init_test_db().await else { return };
    let pool = &test_db.pool;
    let barangay_id = support::seed_barangay(pool, "Loyola Heights").await;
    let resident_id = support::seed_resident(pool, barangay_id, "approved").await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(JwtMiddleware::new(state.jwt.clone()))
                .configure(api::protected),
        ),
    )
    .await;

    let result = test::try_call_service(&app, TestRequest::get().uri("/api/me").to_request()).await;
    assert_eq!(status_of(result), StatusCode::UNAUTHORIZED);

    let result = test::try_call_service(
        &app,
        TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", "Bearer not-a-jwt"))
            .to_request(),
    )
    .await;
    assert_eq!(status_of(result), StatusCode::UNAUTHORIZED);

    let token = state.jwt.issue(resident_id, Role::Resident).expect("token");
    let bearer = format!("Bearer {token}");

    let resp = test::call_service(
        &app,
        TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", bearer.as_str()))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());
    let body = test::read_body(resp).await;
    let me: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(me["user"]["id"], resident_id);
    assert_eq!(me["address"]["barangay_name"], "Loyola Heights");

    let resp = test::call_service(
        &app,
        TestRequest::put()
            .uri("/api/me")
            .insert_header(("Authorization", bearer.as_str()))
            .set_json(json!({ "phone": "09171234567" }))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());
    let body = test::read_body(resp).await;
    let updated: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(updated["phone"], "09171234567");
    assert_eq!(updated["full_name"], "Test resident");

    // Admin scope rejects a resident token.
    let resp = test::call_service(
        &app,
        TestRequest::get()
            .uri("/api/admin/dashboard")
            .insert_header(("Authorization", bearer.as_str()))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 403);
}
