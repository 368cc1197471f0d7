use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;
use std::collections::BTreeMap;

use wastewise::api::paymongo_client::{
    CreateCheckoutSessionRequest,
    LineItem,
    PayMongoClient,
    PayMongoError,
};
use wastewise::mailer::{EmailDraft, MailError, Mailer};

fn checkout_request() -> CreateCheckoutSessionRequest {
    let mut metadata = BTreeMap::new();
    metadata.insert("invoice_id".to_string(), "12".to_string());
    CreateCheckoutSessionRequest {
        line_items: vec![LineItem {
            amount: 15000,
            currency: "PHP".to_string(),
            name: "Basic pickup".to_string(),
            quantity: 1,
        }],
        payment_method_types: vec!["gcash".to_string(), "card".to_string()],
        success_url: "http://localhost/paid".to_string(),
        cancel_url: "http://localhost/cancelled".to_string(),
        reference_number: "INV-000012".to_string(),
        description: "Invoice INV-000012".to_string(),
        send_email_receipt: false,
        show_description: true,
        show_line_items: true,
        metadata,
    }
}

#[tokio::test]
async fn checkout_session_posts_envelope_with_basic_auth() {
    let server = MockServer::start_async().await;
    // base64("sk_test_abc:")
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/checkout_sessions")
            .header("authorization", "Basic c2tfdGVzdF9hYmM6")
            .json_body_partial(
                r#"{"data":{"attributes":{"reference_number":"INV-000012","line_items":[{"amount":15000,"currency":"PHP","name":"Basic pickup","quantity":1}],"metadata":{"invoice_id":"12"}}}}"#,
            );
        then.status(200).json_body(json!({
            "data": {
                "id": "cs_abc",
                "type": "checkout_session",
                "attributes": {
                    "checkout_url": "https://checkout.paymongo.com/cs_abc",
                    "status": "active"
                }
            }
        }));
    });

    let client = PayMongoClient::new(server.url("/"), "sk_test_abc");
    let session = client
        .create_checkout_session(checkout_request())
        .await
        .expect("checkout session");

    mock.assert();
    assert_eq!(session.id, "cs_abc");
    assert_eq!(session.checkout_url, "https://checkout.paymongo.com/cs_abc");
    assert_eq!(session.status.as_deref(), Some("active"));
}

#[tokio::test]
async fn checkout_session_surfaces_api_errors() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/v1/checkout_sessions");
        then.status(400)
            .json_body(json!({ "errors": [{ "code": "parameter_invalid" }] }));
    });

    let client = PayMongoClient::new(server.base_url(), "sk_test_abc");
    let err = client
        .create_checkout_session(checkout_request())
        .await
        .expect_err("api error");

    match err {
        PayMongoError::Api { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("parameter_invalid"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn checkout_session_rejects_unexpected_body() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/v1/checkout_sessions");
        then.status(200).json_body(json!({ "data": { "id": "cs_x" } }));
    });

    let client = PayMongoClient::new(server.base_url(), "sk_test_abc");
    let err = client
        .create_checkout_session(checkout_request())
        .await
        .expect_err("invalid response");
    assert!(matches!(err, PayMongoError::InvalidResponse(_)));
}

#[tokio::test]
async fn brevo_mail_uses_api_key_header() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v3/smtp/email")
            .header("api-key", "brevo-key")
            .json_body_partial(
                r#"{"sender":{"email":"billing@wastewise.ph","name":"WasteWise"},"to":[{"email":"juan@example.com","name":"Juan"}],"subject":"Receipt"}"#,
            );
        then.status(201).json_body(json!({ "messageId": "<abc@brevo>" }));
    });

    let mailer = Mailer::new(
        server.base_url(),
        Some("brevo-key".to_string()),
        "billing@wastewise.ph",
        "WasteWise",
    );
    let draft = EmailDraft {
        subject: "Receipt".to_string(),
        html: "<p>Thanks</p>".to_string(),
    };
    mailer
        .send(draft.to("juan@example.com", "Juan"))
        .await
        .expect("mail sent");

    mock.assert();
}

#[tokio::test]
async fn brevo_errors_are_reported() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/v3/smtp/email");
        then.status(401).body("unauthorized");
    });

    let mailer = Mailer::new(server.base_url(), Some("bad".to_string()), "a@b.c", "A");
    let draft = EmailDraft {
        subject: "Hi".to_string(),
        html: "<p>Hi</p>".to_string(),
    };
    let err = mailer
        .send(draft.to("x@example.com", "X"))
        .await
        .expect_err("api error");
    assert!(matches!(err, MailError::Api { status: 401, .. }));
}

#[tokio::test]
async fn disabled_mailer_never_calls_out() {
    let draft = EmailDraft {
        subject: "Hi".to_string(),
        html: "<p>Hi</p>".to_string(),
    };
    Mailer::disabled()
        .send(draft.to("x@example.com", "X"))
        .await
        .expect("disabled mailer is a no-op");
}
