use serde_json::json;

use wastewise::api::paymongo::{
    normalize_event,
    parse_signature_header,
    signed_livemode,
    verify_signature,
};

mod support;

const SECRET: &str = "whsk_unit";

fn signed_header(body: &[u8], timestamp: &str, live: bool) -> String {
    let sig = support::paymongo_signature(SECRET, timestamp, body);
    if live {
        format!("t={timestamp},te=,li={sig}")
    } else {
        format!("t={timestamp},te={sig},li=")
    }
}

#[test]
fn parse_header_with_blank_live_signature() {
    let header = parse_signature_header("t=1700000000, te=abcd, li=").expect("header");
    assert_eq!(header.timestamp, "1700000000");
    assert_eq!(header.test.as_deref(), Some("abcd"));
    assert_eq!(header.live, None);
}

#[test]
fn parse_header_requires_timestamp() {
    assert!(parse_signature_header("te=abcd,li=ef01").is_none());
    assert!(parse_signature_header("t=,te=abcd").is_none());
}

#[test]
fn test_mode_signature_verifies() {
    let body = br#"{"data":{"id":"evt_1"}}"#;
    let header = parse_signature_header(&signed_header(body, "1700000000", false)).expect("header");
    assert!(verify_signature(SECRET, &header, body, false));
    // live slot is empty
    assert!(!verify_signature(SECRET, &header, body, true));
}

#[test]
fn live_mode_signature_verifies() {
    let body = br#"{"data":{"id":"evt_2"}}"#;
    let header = parse_signature_header(&signed_header(body, "1700000001", true)).expect("header");
    assert!(verify_signature(SECRET, &header, body, true));
}

#[test]
fn signature_rejects_tampering() {
    let body = br#"{"data":{"id":"evt_3"}}"#;
    let header = parse_signature_header(&signed_header(body, "1700000002", false)).expect("header");

    assert!(!verify_signature("other-secret", &header, body, false));
    assert!(!verify_signature(SECRET, &header, br#"{"data":{"id":"evt_4"}}"#, false));

    let mut shifted = header.clone();
    shifted.timestamp = "1700000003".to_string();
    assert!(!verify_signature(SECRET, &shifted, body, false));

    let mut garbage = header;
    garbage.test = Some("not-hex".to_string());
    assert!(!verify_signature(SECRET, &garbage, body, false));
}

#[test]
fn signed_mode_is_read_from_whichever_slot_matches() {
    let body = b"not even json";
    let test_header = parse_signature_header(&signed_header(body, "1700000004", false)).expect("header");
    assert_eq!(signed_livemode(SECRET, &test_header, body), Some(false));

    let live_header = parse_signature_header(&signed_header(body, "1700000004", true)).expect("header");
    assert_eq!(signed_livemode(SECRET, &live_header, body), Some(true));

    assert_eq!(signed_livemode("other-secret", &live_header, body), None);
    let forged = parse_signature_header("t=1700000004,te=deadbeef,li=").expect("header");
    assert_eq!(signed_livemode(SECRET, &forged, body), None);
}

#[test]
fn normalize_checkout_paid_event() {
    let raw = json!({
        "data": {
            "id": "evt_abc",
            "type": "event",
            "attributes": {
                "type": "checkout_session.payment.paid",
                "livemode": false,
                "data": {
                    "id": "cs_123",
                    "type": "checkout_session",
                    "attributes": {
                        "metadata": { "invoice_id": "42", "user_id": "7" },
                        "payments": [
                            { "id": "pay_1", "attributes": { "amount": 15000, "status": "paid" } }
                        ]
                    }
                }
            }
        }
    });

    let event = normalize_event(&raw);
    assert_eq!(event.event_id.as_deref(), Some("evt_abc"));
    assert_eq!(event.event_type.as_deref(), Some("checkout_session.payment.paid"));
    assert!(!event.livemode);
    assert_eq!(event.resource_id.as_deref(), Some("cs_123"));
    assert_eq!(event.invoice_id, Some(42));
    assert_eq!(event.paid_amount_centavos, Some(15000));
}

#[test]
fn normalize_payment_failed_event() {
    let raw = json!({
        "data": {
            "id": "evt_fail",
            "attributes": {
                "type": "payment.failed",
                "livemode": true,
                "data": {
                    "id": "pay_9",
                    "attributes": { "amount": 9900, "metadata": { "invoice_id": 5 } }
                }
            }
        }
    });

    let event = normalize_event(&raw);
    assert_eq!(event.event_type.as_deref(), Some("payment.failed"));
    assert!(event.livemode);
    assert_eq!(event.resource_id.as_deref(), Some("pay_9"));
    assert_eq!(event.invoice_id, Some(5));
    assert_eq!(event.paid_amount_centavos, Some(9900));
}

#[test]
fn normalize_tolerates_missing_fields() {
    let event = normalize_event(&json!({}));
    assert_eq!(event.event_id, None);
    assert_eq!(event.event_type, None);
    assert_eq!(event.invoice_id, None);
    assert!(!event.livemode);
}
