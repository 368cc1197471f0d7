// src/ocr.rs
//
// Stand-in for reading GCash receipt screenshots. The "scan" echoes what the
// resident typed, except that a configurable share of receipts come back
// unreadable. The result only annotates the payment; an admin confirms it.

use rand::Rng;
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::models::OcrStatus;

/// GCash reference numbers are 13 digits.
pub const GCASH_REFERENCE_LEN: usize = 13;

#[derive(Debug, Clone)]
pub struct ReceiptClaim {
    pub reference_number: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrReading {
    Unreadable,
    Read {
        reference_number: String,
        amount: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OcrOutcome {
    pub status: OcrStatus,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MockOcr {
    failure_rate: f64,
}

impl MockOcr {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    pub fn read(&self, claim: &ReceiptClaim) -> OcrReading {
        if rand::thread_rng().gen_bool(self.failure_rate) {
            return OcrReading::Unreadable;
        }
        OcrReading::Read {
            reference_number: claim.reference_number.clone(),
            amount: claim.amount.clone(),
        }
    }

    pub fn verify(&self, claim: &ReceiptClaim, expected_amount: &str) -> OcrOutcome {
        match self.read(claim) {
            OcrReading::Unreadable => OcrOutcome {
                status: OcrStatus::Unreadable,
                reasons: vec!["receipt image could not be read".to_string()],
            },
            OcrReading::Read {
                reference_number,
                amount,
            } => compare(&reference_number, &amount, expected_amount),
        }
    }
}

fn compare(reference_number: &str, amount: &str, expected_amount: &str) -> OcrOutcome {
    let mut reasons = Vec::new();

    if !is_gcash_reference(reference_number) {
        reasons.push(format!(
            "reference number is not {GCASH_REFERENCE_LEN} digits"
        ));
    }

    match (parse_centavos(amount), parse_centavos(expected_amount)) {
        (Some(read), Some(expected)) if read == expected => {}
        (Some(_), Some(_)) => reasons.push(format!(
            "amount {amount} does not match invoice amount {expected_amount}"
        )),
        _ => reasons.push(format!("amount {amount} is not a valid peso amount")),
    }

    OcrOutcome {
        status: if reasons.is_empty() {
            OcrStatus::Matched
        } else {
            OcrStatus::Mismatch
        },
        reasons,
    }
}

pub fn normalize_reference(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn is_gcash_reference(reference: &str) -> bool {
    reference.len() == GCASH_REFERENCE_LEN && reference.chars().all(|c| c.is_ascii_digit())
}

/// Parses `"150"`, `"150.5"` or `"150.50"` into centavos. At most two
/// fractional digits; no sign, no thousands separators.
pub fn parse_centavos(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (whole, frac) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if raw.ends_with('.') {
        return None;
    }

    let pesos: i64 = whole.parse().ok()?;
    let centavos: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    pesos.checked_mul(100)?.checked_add(centavos)
}

/// Verifies a pending manual payment and stores the outcome. Only payments
/// still `not_checked` are touched, so redelivered work is a no-op.
pub async fn verify_payment(
    pool: &PgPool,
    ocr: &MockOcr,
    payment_id: i32,
) -> Result<Option<OcrOutcome>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT pm.provider_reference, pm.amount::text AS amount,
                  i.amount::text AS invoice_amount
           FROM payments pm
           JOIN invoices i ON i.id = pm.invoice_id
           WHERE pm.id = $1
             AND pm.method = 'gcash_manual'
             AND pm.status = 'pending'
             AND pm.ocr_status = 'not_checked'"#,
    )
    .bind(payment_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let claim = ReceiptClaim {
        reference_number: row.get("provider_reference"),
        amount: row.get("amount"),
    };
    let invoice_amount: String = row.get("invoice_amount");
    let outcome = ocr.verify(&claim, &invoice_amount);

    let details = serde_json::json!({ "reasons": outcome.reasons });
    sqlx::query(
        r#"UPDATE payments
           SET ocr_status = $1, ocr_details = $2
           WHERE id = $3 AND ocr_status = 'not_checked'"#,
    )
    .bind(outcome.status.as_str())
    .bind(details)
    .bind(payment_id)
    .execute(pool)
    .await?;

    log::info!(
        "receipt ocr payment_id={payment_id} status={}",
        outcome.status
    );
    Ok(Some(outcome))
}
