// src/api/billing.rs

use actix_web::{get, post, put, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::api::auth::AuthUser;
use crate::billing::{self, format_centavos};
use crate::error::{unique_violation, ApiError};
use crate::models::{InvoiceStatus, Role, SubscriptionPlan, PLAN_COLUMNS};
use crate::ocr::parse_centavos;
use crate::{db, local_today, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub plan_slug: String,
}

#[utoipa::path(
    get,
    path = "/api/billing/subscription-plans",
    tag = "billing",
    responses((status = 200, description = "Active plans, cheapest first", body = [SubscriptionPlan])),
    security(("bearer" = []))
)]
#[get("/billing/subscription-plans")]
pub async fn list_plans(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let plans = db::list_active_plans(&state.pool).await?;
    Ok(HttpResponse::Ok().json(plans))
}

#[utoipa::path(
    post,
    path = "/api/billing/subscriptions",
    tag = "billing",
    request_body = SubscribeRequest,
    responses(
        (status = 201, description = "Subscription created with its first invoice"),
        (status = 400, description = "Not approved or already subscribed"),
        (status = 404, description = "Unknown plan")
    ),
    security(("bearer" = []))
)]
#[post("/billing/subscriptions")]
pub async fn subscribe(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<SubscribeRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Resident)?;

    let (subscription, invoice) = billing::subscribe(
        &state.pool,
        user.id,
        payload.plan_slug.trim(),
        local_today(),
        state.invoice_due_days,
    )
    .await?;

    Ok(HttpResponse::Created().json(json!({
        "subscription": subscription,
        "invoice": invoice,
    })))
}

#[get("/billing/subscription")]
pub async fn current_subscription(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let (subscription, plan) = db::get_live_subscription(&state.pool, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("no active subscription"))?;

    Ok(HttpResponse::Ok().json(json!({
        "subscription": subscription,
        "plan": plan,
    })))
}

#[post("/billing/subscription/cancel")]
pub async fn cancel_subscription(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let subscription = billing::cancel_subscription(&state.pool, user.id).await?;
    Ok(HttpResponse::Ok().json(subscription))
}

#[get("/billing/invoices")]
pub async fn list_invoices(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let invoices = db::list_user_invoices(&state.pool, user.id).await?;
    Ok(HttpResponse::Ok().json(invoices))
}

#[get("/billing/invoices/{id}")]
pub async fn get_invoice(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let invoice = db::get_invoice(&state.pool, path.into_inner())
        .await?
        .filter(|i| i.user_id == user.id)
        .ok_or_else(|| ApiError::not_found("invoice not found"))?;

    let payments = db::list_invoice_payments(&state.pool, invoice.id).await?;
    let receipts = db::list_invoice_receipts(&state.pool, invoice.id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "invoice": invoice,
        "payments": payments,
        "receipt": receipts.into_iter().next(),
    })))
}

#[get("/billing/receipts")]
pub async fn list_receipts(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let receipts = db::list_user_receipts(&state.pool, user.id).await?;
    Ok(HttpResponse::Ok().json(receipts))
}

// Admin

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePlanRequest {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    /// Decimal string, e.g. "250.00".
    pub price: String,
    pub currency: Option<String>,
    pub billing_cycle_days: Option<i32>,
    pub pickups_per_week: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub is_active: Option<bool>,
}

fn parse_price(raw: &str) -> Result<String, ApiError> {
    match parse_centavos(raw) {
        Some(c) if c > 0 => Ok(format_centavos(c)),
        _ => Err(ApiError::bad_request(
            "price must be a positive amount with at most 2 decimals",
        )),
    }
}

#[post("/billing/subscription-plans")]
pub async fn create_plan(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CreatePlanRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let payload = payload.into_inner();

    let slug = payload.slug.trim().to_lowercase();
    if slug.is_empty() || payload.name.trim().is_empty() {
        return Err(ApiError::bad_request("slug and name are required"));
    }
    let price = parse_price(&payload.price)?;
    let cycle = payload.billing_cycle_days.unwrap_or(30);
    if cycle <= 0 {
        return Err(ApiError::bad_request("billing_cycle_days must be positive"));
    }

    let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
        r#"INSERT INTO subscription_plans AS p
           (slug, name, description, price, currency, billing_cycle_days, pickups_per_week)
           VALUES ($1, $2, $3, $4::numeric, $5, $6, $7)
           RETURNING {PLAN_COLUMNS}"#
    ))
    .bind(&slug)
    .bind(payload.name.trim())
    .bind(payload.description.as_deref())
    .bind(&price)
    .bind(payload.currency.as_deref().unwrap_or("PHP"))
    .bind(cycle)
    .bind(payload.pickups_per_week.unwrap_or(1))
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some("subscription_plans_slug_key") => ApiError::bad_request("plan slug already exists"),
        _ => ApiError::from(e),
    })?;

    log::info!("plan created slug={slug} price={price}");
    Ok(HttpResponse::Created().json(plan))
}

#[put("/billing/subscription-plans/{id}")]
pub async fn update_plan(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<UpdatePlanRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let payload = payload.into_inner();
    let price = payload.price.as_deref().map(parse_price).transpose()?;

    let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
        r#"UPDATE subscription_plans AS p
           SET name = COALESCE($2, p.name),
               description = COALESCE($3, p.description),
               price = COALESCE($4::numeric, p.price),
               is_active = COALESCE($5, p.is_active)
           WHERE p.id = $1
           RETURNING {PLAN_COLUMNS}"#
    ))
    .bind(path.into_inner())
    .bind(payload.name.as_deref().map(str::trim))
    .bind(payload.description.as_deref())
    .bind(price)
    .bind(payload.is_active)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("plan not found"))?;

    Ok(HttpResponse::Ok().json(plan))
}

#[derive(Debug, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<String>,
}

#[get("/billing/invoices")]
pub async fn admin_list_invoices(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<InvoiceFilter>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<InvoiceStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let invoices = db::list_invoices(&state.pool, status).await?;
    Ok(HttpResponse::Ok().json(invoices))
}
