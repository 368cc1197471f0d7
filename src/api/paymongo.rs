// src/api/paymongo.rs
//
// PayMongo webhook signatures and event normalization.
// Header: `Paymongo-Signature: t=<unix>,te=<test hex>,li=<live hex>`,
// signature = hex(HMAC-SHA256(secret, "<t>.<raw body>")).

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Paymongo-Signature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: String,
    pub test: Option<String>,
    pub live: Option<String>,
}

pub fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut test = None;
    let mut live = None;

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "t" => timestamp = Some(value.to_string()),
            "te" if !value.is_empty() => test = Some(value.to_string()),
            "li" if !value.is_empty() => live = Some(value.to_string()),
            _ => {}
        }
    }

    Some(SignatureHeader {
        timestamp: timestamp.filter(|t| !t.is_empty())?,
        test,
        live,
    })
}

/// Constant-time check of the `li` (live) or `te` (test) signature.
pub fn verify_signature(secret: &str, header: &SignatureHeader, body: &[u8], livemode: bool) -> bool {
    let candidate = if livemode { &header.live } else { &header.test };
    candidate
        .as_deref()
        .is_some_and(|candidate| signature_matches(secret, &header.timestamp, candidate, body))
}

/// Checks the raw body before anything parses it. Returns the mode whose
/// signature matched: `Some(true)` for live, `Some(false)` for test.
pub fn signed_livemode(secret: &str, header: &SignatureHeader, body: &[u8]) -> Option<bool> {
    if verify_signature(secret, header, body, true) {
        Some(true)
    } else if verify_signature(secret, header, body, false) {
        Some(false)
    } else {
        None
    }
}

fn signature_matches(secret: &str, timestamp: &str, candidate: &str, body: &[u8]) -> bool {
    let Ok(expected) = hex::decode(candidate) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedEvent {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub livemode: bool,
    /// Id of the resource the event is about (checkout session, payment).
    pub resource_id: Option<String>,
    pub invoice_id: Option<i32>,
    pub paid_amount_centavos: Option<i64>,
}

/// Event shape: `{data: {id, attributes: {type, livemode, data: {id, attributes}}}}`.
pub fn normalize_event(raw: &Value) -> NormalizedEvent {
    let event = &raw["data"];
    let attrs = &event["attributes"];
    let resource = &attrs["data"];
    let resource_attrs = &resource["attributes"];

    let invoice_id = resource_attrs["metadata"]["invoice_id"]
        .as_str()
        .and_then(|v| v.parse().ok())
        .or_else(|| {
            resource_attrs["metadata"]["invoice_id"]
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
        });

    let paid_amount_centavos = resource_attrs["payments"]
        .as_array()
        .and_then(|payments| payments.first())
        .and_then(|p| p["attributes"]["amount"].as_i64())
        .or_else(|| resource_attrs["amount"].as_i64());

    NormalizedEvent {
        event_id: event["id"].as_str().map(str::to_string),
        event_type: attrs["type"].as_str().map(str::to_string),
        livemode: attrs["livemode"].as_bool().unwrap_or(false),
        resource_id: resource["id"].as_str().map(str::to_string),
        invoice_id,
        paid_amount_centavos,
    }
}
