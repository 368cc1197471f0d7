// src/api/payments.rs

use std::collections::BTreeMap;

use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::api::auth::AuthUser;
use crate::api::paymongo_client::{CreateCheckoutSessionRequest, LineItem};
use crate::billing::{self, format_centavos, ConfirmOutcome};
use crate::error::{unique_violation, ApiError};
use crate::mailer::templates;
use crate::models::{Invoice, InvoiceStatus, Payment, Receipt, Role, PAYMENT_COLUMNS};
use crate::ocr::{self, is_gcash_reference, normalize_reference, parse_centavos};
use crate::{db, local_today, AppState};

pub const MAX_RECEIPT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub invoice_id: i32,
}

async fn payable_invoice(
    state: &AppState,
    user_id: i32,
    invoice_id: i32,
) -> Result<Invoice, ApiError> {
    let invoice = db::get_invoice(&state.pool, invoice_id)
        .await?
        .filter(|i| i.user_id == user_id)
        .ok_or_else(|| ApiError::not_found("invoice not found"))?;

    match invoice.status {
        InvoiceStatus::Unpaid | InvoiceStatus::Overdue => Ok(invoice),
        other => Err(ApiError::bad_request(format!("invoice is {other}"))),
    }
}

/// Emails the receipt for a confirmed payment. Failures are logged only.
pub(crate) async fn email_receipt(
    state: &AppState,
    user_id: i32,
    receipt: &Receipt,
    invoice_number: &str,
) {
    match db::get_user(&state.pool, user_id).await {
        Ok(Some(user)) => {
            let draft = templates::payment_receipt(
                &user.full_name,
                &receipt.receipt_number,
                invoice_number,
                &receipt.amount,
                &receipt.currency,
            );
            state
                .mailer
                .send_in_background(draft.to(&user.email, &user.full_name));
        }
        Ok(None) => log::warn!("receipt email skipped, user_id={user_id} not found"),
        Err(e) => log::error!("receipt email user lookup error: {e}"),
    }
}

#[utoipa::path(
    post,
    path = "/api/payments/paymongo/checkout",
    tag = "payments",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Checkout session created"),
        (status = 400, description = "Invoice not payable or provider error"),
        (status = 404, description = "Invoice not found")
    ),
    security(("bearer" = []))
)]
#[post("/payments/paymongo/checkout")]
pub async fn paymongo_checkout(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Resident)?;
    let invoice = payable_invoice(&state, user.id, payload.invoice_id).await?;

    let amount = parse_centavos(&invoice.amount)
        .ok_or_else(|| ApiError::internal("invoice amount", &invoice.amount))?;

    let mut metadata = BTreeMap::new();
    metadata.insert("invoice_id".to_string(), invoice.id.to_string());
    metadata.insert("user_id".to_string(), user.id.to_string());

    let base = state.app_base_url.trim_end_matches('/');
    let request = CreateCheckoutSessionRequest {
        line_items: vec![LineItem {
            amount,
            currency: invoice.currency.clone(),
            name: format!("Waste collection {}", invoice.invoice_number),
            quantity: 1,
        }],
        payment_method_types: vec!["gcash".into(), "paymaya".into(), "card".into()],
        success_url: format!("{base}/payments/success?invoice_id={}", invoice.id),
        cancel_url: format!("{base}/payments/cancel?invoice_id={}", invoice.id),
        reference_number: invoice.invoice_number.clone(),
        description: format!(
            "Invoice {} ({} to {})",
            invoice.invoice_number, invoice.period_start, invoice.period_end
        ),
        send_email_receipt: false,
        show_description: true,
        show_line_items: true,
        metadata,
    };

    let session = state
        .paymongo
        .create_checkout_session(request)
        .await
        .map_err(|e| {
            log::error!("paymongo checkout error invoice_id={}: {e}", invoice.id);
            ApiError::BadRequest(format!("payment provider error: {e}"))
        })?;

    let payment_id: i32 = sqlx::query_scalar(
        r#"INSERT INTO payments
           (invoice_id, user_id, method, provider_reference, amount, currency, payload)
           VALUES ($1, $2, 'paymongo', $3, $4::numeric, $5, $6)
           RETURNING id"#,
    )
    .bind(invoice.id)
    .bind(user.id)
    .bind(&session.id)
    .bind(&invoice.amount)
    .bind(&invoice.currency)
    .bind(json!({ "checkout_session": { "id": session.id, "status": session.status } }))
    .fetch_one(&state.pool)
    .await?;

    log::info!(
        "paymongo checkout created payment_id={payment_id} invoice_id={} session={}",
        invoice.id,
        session.id
    );

    Ok(HttpResponse::Created().json(json!({
        "payment_id": payment_id,
        "checkout_url": session.checkout_url,
    })))
}

/// Maps an upload to a stored extension and content type.
pub fn receipt_format(
    filename: Option<&str>,
    content_type: Option<&str>,
) -> Option<(&'static str, &'static str)> {
    let by_type = match content_type.map(str::to_ascii_lowercase).as_deref() {
        Some("image/jpeg") | Some("image/jpg") => Some(("jpg", "image/jpeg")),
        Some("image/png") => Some(("png", "image/png")),
        Some("image/webp") => Some(("webp", "image/webp")),
        _ => None,
    };
    if by_type.is_some() {
        return by_type;
    }

    let ext = filename?.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(("jpg", "image/jpeg")),
        "png" => Some(("png", "image/png")),
        "webp" => Some(("webp", "image/webp")),
        _ => None,
    }
}

#[derive(Default)]
struct GcashForm {
    invoice_id: Option<String>,
    reference_number: Option<String>,
    amount: Option<String>,
    receipt: Option<UploadedImage>,
}

struct UploadedImage {
    bytes: Vec<u8>,
    filename: Option<String>,
    content_type: Option<String>,
}

async fn read_gcash_form(mut payload: Multipart) -> Result<GcashForm, ApiError> {
    let mut form = GcashForm::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?;

        let cd = field.content_disposition();
        let name = cd.get_name().unwrap_or_default().to_string();
        let filename = cd.get_filename().map(str::to_string);
        let content_type = field.content_type().map(|m| m.essence_str().to_string());

        let mut data: Vec<u8> = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?;
            if data.len() + chunk.len() > MAX_RECEIPT_BYTES {
                return Err(ApiError::bad_request("receipt image must be at most 5 MiB"));
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "receipt" => {
                form.receipt = Some(UploadedImage {
                    bytes: data,
                    filename,
                    content_type,
                })
            }
            "invoice_id" | "reference_number" | "amount" => {
                let text = String::from_utf8(data)
                    .map_err(|_| ApiError::bad_request(format!("{name} must be text")))?;
                match name.as_str() {
                    "invoice_id" => form.invoice_id = Some(text),
                    "reference_number" => form.reference_number = Some(text),
                    _ => form.amount = Some(text),
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

#[utoipa::path(
    post,
    path = "/api/payments/gcash",
    tag = "payments",
    request_body(content = String, content_type = "multipart/form-data", description = "invoice_id, reference_number, amount, receipt image"),
    responses(
        (status = 201, description = "Manual payment recorded, awaiting review"),
        (status = 400, description = "Invalid form, image or duplicate reference")
    ),
    security(("bearer" = []))
)]
#[post("/payments/gcash")]
pub async fn gcash_payment(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Resident)?;
    let form = read_gcash_form(payload).await?;

    let invoice_id: i32 = form
        .invoice_id
        .as_deref()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ApiError::bad_request("invoice_id is required"))?;

    let amount = form
        .amount
        .as_deref()
        .and_then(parse_centavos)
        .filter(|c| *c > 0)
        .map(format_centavos)
        .ok_or_else(|| {
            ApiError::bad_request("amount must be a positive amount with at most 2 decimals")
        })?;

    let reference = normalize_reference(form.reference_number.as_deref().unwrap_or_default());
    if !is_gcash_reference(&reference) {
        return Err(ApiError::bad_request("reference_number must be 13 digits"));
    }

    let image = form
        .receipt
        .filter(|r| !r.bytes.is_empty())
        .ok_or_else(|| ApiError::bad_request("receipt image is required"))?;
    let (ext, content_type) = receipt_format(image.filename.as_deref(), image.content_type.as_deref())
        .ok_or_else(|| ApiError::bad_request("receipt must be a JPEG, PNG or WebP image"))?;

    let invoice = payable_invoice(&state, user.id, invoice_id).await?;

    let duplicate: bool = sqlx::query_scalar(
        r#"SELECT EXISTS (
               SELECT 1 FROM payments
               WHERE method = 'gcash_manual' AND provider_reference = $1)"#,
    )
    .bind(&reference)
    .fetch_one(&state.pool)
    .await?;
    if duplicate {
        return Err(ApiError::bad_request("reference number already submitted"));
    }

    let stored = state
        .storage
        .put_receipt(user.id, ext, image.bytes, content_type)
        .await
        .map_err(|e| ApiError::internal("receipt upload", e))?;

    let payment = sqlx::query_as::<_, Payment>(&format!(
        r#"INSERT INTO payments AS pm
           (invoice_id, user_id, method, provider_reference, amount, currency,
            receipt_image_key, receipt_image_url)
           VALUES ($1, $2, 'gcash_manual', $3, $4::numeric, $5, $6, $7)
           RETURNING {PAYMENT_COLUMNS}"#
    ))
    .bind(invoice.id)
    .bind(user.id)
    .bind(&reference)
    .bind(&amount)
    .bind(&invoice.currency)
    .bind(&stored.key)
    .bind(&stored.url)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some("payments_method_reference_key") => {
            ApiError::bad_request("reference number already submitted")
        }
        _ => ApiError::from(e),
    })?;

    log::info!(
        "gcash payment submitted payment_id={} invoice_id={} user_id={}",
        payment.id,
        invoice.id,
        user.id
    );

    let payment = if state.inline_ocr {
        ocr::verify_payment(&state.pool, &state.ocr, payment.id).await?;
        db::get_payment(&state.pool, payment.id)
            .await?
            .unwrap_or(payment)
    } else {
        payment
    };

    Ok(HttpResponse::Created().json(payment))
}

#[get("/payments")]
pub async fn list_payments(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let payments = db::list_user_payments(&state.pool, user.id).await?;
    Ok(HttpResponse::Ok().json(payments))
}

// Admin review

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewRequest {
    pub note: Option<String>,
}

#[get("/payments/pending")]
pub async fn pending_payments(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let payments = db::list_pending_manual_payments(&state.pool).await?;
    Ok(HttpResponse::Ok().json(payments))
}

#[post("/payments/{id}/confirm")]
pub async fn confirm_payment(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: Option<web::Json<ReviewRequest>>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let payment_id = path.into_inner();
    let note = payload.and_then(|p| p.into_inner().note);

    let mut tx = state.pool.begin().await?;
    let outcome = billing::confirm_payment(&mut *tx, payment_id, Some(user.id), local_today()).await?;

    match outcome {
        ConfirmOutcome::AlreadyProcessed { status } => {
            tx.rollback().await?;
            Err(ApiError::bad_request(format!("payment is already {status}")))
        }
        ConfirmOutcome::Confirmed {
            user_id,
            receipt,
            invoice_number,
            subscription_status,
        } => {
            if let Some(note) = note.as_deref() {
                sqlx::query("UPDATE payments SET review_note = $2 WHERE id = $1")
                    .bind(payment_id)
                    .bind(note)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;

            email_receipt(&state, user_id, &receipt, &invoice_number).await;

            Ok(HttpResponse::Ok().json(json!({
                "payment_id": payment_id,
                "receipt": receipt,
                "invoice_number": invoice_number,
                "subscription_status": subscription_status,
            })))
        }
    }
}

#[post("/payments/{id}/reject")]
pub async fn reject_payment(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<ReviewRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let payment_id = path.into_inner();
    let note = payload
        .into_inner()
        .note
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("note is required"))?;

    let rejected = sqlx::query_as::<_, Payment>(&format!(
        r#"UPDATE payments AS pm
           SET status = 'rejected', review_note = $2, reviewed_by = $3
           WHERE pm.id = $1 AND pm.status = 'pending'
           RETURNING {PAYMENT_COLUMNS}"#
    ))
    .bind(payment_id)
    .bind(note.trim())
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?;

    match rejected {
        Some(payment) => {
            log::info!("payment rejected payment_id={payment_id} by={}", user.id);
            Ok(HttpResponse::Ok().json(payment))
        }
        None => match db::get_payment(&state.pool, payment_id).await? {
            Some(p) => Err(ApiError::bad_request(format!("payment is already {}", p.status))),
            None => Err(ApiError::not_found("payment not found")),
        },
    }
}
