// src/api/webhooks_paymongo.rs

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde_json::{json, Value};
use sqlx::{PgConnection, Row};

use crate::api::paymongo::{
    normalize_event, parse_signature_header, signed_livemode, NormalizedEvent, SIGNATURE_HEADER,
};
use crate::api::payments::email_receipt;
use crate::billing::{self, ConfirmOutcome};
use crate::error::ApiError;
use crate::{local_today, AppState};

pub const PROVIDER: &str = "paymongo";

const CHECKOUT_PAID: &str = "checkout_session.payment.paid";
const PAYMENT_FAILED: &str = "payment.failed";

fn ack(extra: Value) -> HttpResponse {
    let mut body = json!({ "ok": true });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    HttpResponse::Ok().json(body)
}

#[utoipa::path(
    post,
    path = "/webhook/paymongo",
    tag = "webhooks",
    params(("Paymongo-Signature" = String, Header, description = "t=<unix>,te=<hex>,li=<hex>")),
    responses(
        (status = 200, description = "Event processed, replayed or ignored"),
        (status = 400, description = "Malformed event"),
        (status = 401, description = "Missing or invalid signature")
    )
)]
#[post("/webhook/paymongo")]
pub async fn paymongo_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let header = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_signature_header)
        .ok_or_else(|| ApiError::Unauthorized("missing signature".to_string()))?;

    let Some(signed_live) = signed_livemode(&state.paymongo_webhook_secret, &header, &body) else {
        log::warn!("paymongo webhook rejected: bad signature ({} bytes)", body.len());
        return Err(ApiError::Unauthorized("invalid signature".to_string()));
    };

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid event body: {e}")))?;
    let event = normalize_event(&raw);

    // A test signature does not vouch for a live event, nor the reverse.
    if event.livemode != signed_live {
        log::warn!("paymongo webhook rejected: mode mismatch event_id={:?}", event.event_id);
        return Err(ApiError::Unauthorized("invalid signature".to_string()));
    }

    let event_id = event
        .event_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("event id missing"))?;
    let event_type = event.event_type.clone().unwrap_or_default();

    let mut tx = state.pool.begin().await?;

    let recorded = sqlx::query(
        r#"INSERT INTO webhook_events (provider, event_id, event_type)
           VALUES ($1, $2, $3)
           ON CONFLICT (provider, event_id) DO NOTHING"#,
    )
    .bind(PROVIDER)
    .bind(&event_id)
    .bind(&event_type)
    .execute(&mut *tx)
    .await?;

    if recorded.rows_affected() == 0 {
        log::info!("paymongo webhook replay event_id={event_id}");
        return Ok(ack(json!({ "idempotent": true })));
    }

    log::info!("paymongo webhook event_id={event_id} type={event_type}");

    match event_type.as_str() {
        CHECKOUT_PAID => {
            let Some(payment_id) = find_checkout_payment(&mut *tx, &event).await? else {
                tx.commit().await?;
                log::warn!("paymongo paid event for unknown session {:?}", event.resource_id);
                return Ok(ack(json!({ "ignored": true })));
            };

            sqlx::query(
                r#"UPDATE payments
                   SET payload = COALESCE(payload, '{}'::jsonb) || $2::jsonb
                   WHERE id = $1"#,
            )
            .bind(payment_id)
            .bind(json!({ "event": raw }))
            .execute(&mut *tx)
            .await?;

            let outcome = billing::confirm_payment(&mut *tx, payment_id, None, local_today()).await?;
            tx.commit().await?;

            match outcome {
                ConfirmOutcome::Confirmed {
                    user_id,
                    receipt,
                    invoice_number,
                    subscription_status,
                } => {
                    email_receipt(&state, user_id, &receipt, &invoice_number).await;
                    Ok(ack(json!({
                        "payment_id": payment_id,
                        "receipt_number": receipt.receipt_number,
                        "subscription_status": subscription_status,
                    })))
                }
                ConfirmOutcome::AlreadyProcessed { status } => {
                    Ok(ack(json!({ "payment_id": payment_id, "already": status })))
                }
            }
        }
        PAYMENT_FAILED => {
            let failed: Option<i32> = match find_failed_payment(&mut *tx, &event).await? {
                Some(payment_id) => sqlx::query_scalar(
                    r#"UPDATE payments
                       SET status = 'failed', payload = COALESCE(payload, '{}'::jsonb) || $2::jsonb
                       WHERE id = $1 AND status = 'pending'
                       RETURNING id"#,
                )
                .bind(payment_id)
                .bind(json!({ "event": raw }))
                .fetch_optional(&mut *tx)
                .await?,
                None => None,
            };
            tx.commit().await?;

            match failed {
                Some(payment_id) => {
                    log::info!("paymongo payment failed payment_id={payment_id}");
                    Ok(ack(json!({ "payment_id": payment_id })))
                }
                None => Ok(ack(json!({ "ignored": true }))),
            }
        }
        _ => {
            tx.commit().await?;
            Ok(ack(json!({ "ignored": true })))
        }
    }
}

async fn find_checkout_payment(
    conn: &mut PgConnection,
    event: &NormalizedEvent,
) -> Result<Option<i32>, sqlx::Error> {
    let Some(session_id) = event.resource_id.as_deref() else {
        return Ok(None);
    };
    let row = sqlx::query(
        r#"SELECT id, (amount * 100)::bigint AS centavos
           FROM payments
           WHERE method = 'paymongo' AND provider_reference = $1"#,
    )
    .bind(session_id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|r| {
        let id: i32 = r.get("id");
        let centavos: i64 = r.get("centavos");
        if let Some(paid) = event.paid_amount_centavos {
            if paid != centavos {
                log::warn!(
                    "paymongo amount differs payment_id={id} expected={centavos} paid={paid}"
                );
            }
        }
        id
    }))
}

/// Matches the failed resource to a checkout session, or falls back to the
/// latest pending PayMongo payment of the invoice in the metadata.
async fn find_failed_payment(
    conn: &mut PgConnection,
    event: &NormalizedEvent,
) -> Result<Option<i32>, sqlx::Error> {
    if let Some(reference) = event.resource_id.as_deref() {
        let by_reference: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM payments WHERE method = 'paymongo' AND provider_reference = $1",
        )
        .bind(reference)
        .fetch_optional(&mut *conn)
        .await?;
        if by_reference.is_some() {
            return Ok(by_reference);
        }
    }

    let Some(invoice_id) = event.invoice_id else {
        return Ok(None);
    };
    sqlx::query_scalar(
        r#"SELECT id FROM payments
           WHERE method = 'paymongo' AND invoice_id = $1 AND status = 'pending'
           ORDER BY created_at DESC
           LIMIT 1"#,
    )
    .bind(invoice_id)
    .fetch_optional(&mut *conn)
    .await
}
