// src/api/admin.rs
//
// Registration approval, user and collector management, dashboard counts.

use actix_web::{delete, get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::api::auth::{
    duplicate_user_error, hash_password, validate_email, validate_password, validate_username,
    AuthUser,
};
use crate::error::ApiError;
use crate::mailer::templates;
use crate::models::{ApprovalStatus, Role};
use crate::{collections, db, local_today, AppState};

#[get("/registrations/pending")]
pub async fn pending_registrations(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let pending = db::list_pending_registrations(&state.pool).await?;
    Ok(HttpResponse::Ok().json(pending))
}

#[post("/registrations/{id}/approve")]
pub async fn approve_registration(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;

    let resident = db::decide_registration(&state.pool, path.into_inner(), ApprovalStatus::Approved, None)
        .await?
        .ok_or_else(|| ApiError::not_found("pending registration not found"))?;

    log::info!("registration approved user_id={} by={}", resident.id, user.id);
    state.mailer.send_in_background(
        templates::registration_approved(&resident.full_name).to(&resident.email, &resident.full_name),
    );
    Ok(HttpResponse::Ok().json(resident))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[post("/registrations/{id}/reject")]
pub async fn reject_registration(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<RejectRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::bad_request("reason is required"));
    }

    let resident = db::decide_registration(
        &state.pool,
        path.into_inner(),
        ApprovalStatus::Rejected,
        Some(reason),
    )
    .await?
    .ok_or_else(|| ApiError::not_found("pending registration not found"))?;

    log::info!("registration rejected user_id={} by={}", resident.id, user.id);
    state.mailer.send_in_background(
        templates::registration_rejected(&resident.full_name, reason)
            .to(&resident.email, &resident.full_name),
    );
    Ok(HttpResponse::Ok().json(resident))
}

#[derive(Debug, Deserialize)]
pub struct UserFilter {
    pub role: Option<String>,
    pub status: Option<String>,
}

#[get("/users")]
pub async fn list_users(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<UserFilter>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let bad = |e: crate::models::UnknownVariant| ApiError::bad_request(e.to_string());
    let role = query.role.as_deref().map(str::parse::<Role>).transpose().map_err(bad)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ApprovalStatus>)
        .transpose()
        .map_err(bad)?;

    let users = db::list_users(&state.pool, role, status).await?;
    Ok(HttpResponse::Ok().json(users))
}

#[derive(Debug, Deserialize)]
pub struct CreateCollectorRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub vehicle_plate: Option<String>,
}

#[post("/collectors")]
pub async fn create_collector(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CreateCollectorRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let payload = payload.into_inner();
    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&payload.password)?;
    if payload.full_name.trim().is_empty() {
        return Err(ApiError::bad_request("full_name is required"));
    }

    let password_hash = hash_password(payload.password).await?;

    let mut tx = state.pool.begin().await?;
    let user_id: i32 = sqlx::query_scalar(
        r#"INSERT INTO users (username, email, password_hash, full_name, phone, role, approval_status)
           VALUES ($1, $2, $3, $4, $5, 'collector', 'approved')
           RETURNING id"#,
    )
    .bind(&username)
    .bind(&email)
    .bind(password_hash)
    .bind(payload.full_name.trim())
    .bind(payload.phone.as_deref())
    .fetch_one(&mut *tx)
    .await
    .map_err(duplicate_user_error)?;

    let collector_id: i32 = sqlx::query_scalar(
        "INSERT INTO collectors (user_id, vehicle_plate) VALUES ($1, $2) RETURNING id",
    )
    .bind(user_id)
    .bind(payload.vehicle_plate.as_deref().map(str::trim))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    log::info!("collector created collector_id={collector_id} username={username}");
    let collector = db::get_collector(&state.pool, collector_id)
        .await?
        .ok_or_else(|| ApiError::not_found("collector not found"))?;
    Ok(HttpResponse::Created().json(collector))
}

#[get("/collectors")]
pub async fn list_collectors(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let collectors = db::list_collectors(&state.pool).await?;
    Ok(HttpResponse::Ok().json(collectors))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub barangay_id: i32,
}

#[post("/collectors/{id}/assignments")]
pub async fn assign_collector(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<AssignRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let collector_id = path.into_inner();

    if db::get_collector(&state.pool, collector_id).await?.is_none() {
        return Err(ApiError::not_found("collector not found"));
    }
    db::check_location(&state.pool, payload.barangay_id, None).await?;

    sqlx::query(
        r#"INSERT INTO collector_assignments (collector_id, barangay_id)
           VALUES ($1, $2)
           ON CONFLICT (collector_id, barangay_id) DO NOTHING"#,
    )
    .bind(collector_id)
    .bind(payload.barangay_id)
    .execute(&state.pool)
    .await?;

    let collector = db::get_collector(&state.pool, collector_id)
        .await?
        .ok_or_else(|| ApiError::not_found("collector not found"))?;
    Ok(HttpResponse::Ok().json(collector))
}

#[delete("/collectors/{id}/assignments/{barangay_id}")]
pub async fn unassign_collector(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<(i32, i32)>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let (collector_id, barangay_id) = path.into_inner();

    let removed = sqlx::query(
        "DELETE FROM collector_assignments WHERE collector_id = $1 AND barangay_id = $2",
    )
    .bind(collector_id)
    .bind(barangay_id)
    .execute(&state.pool)
    .await?;

    if removed.rows_affected() == 0 {
        return Err(ApiError::not_found("assignment not found"));
    }
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub pending_registrations: i64,
    pub active_residents: i64,
    pub subscriptions: StatusCounts,
    pub outstanding_invoices: i64,
    pub outstanding_amount: String,
    pub payments_awaiting_review: i64,
    pub collections_today: StatusCounts,
}

/// `{status: count}` pairs.
pub type StatusCounts = std::collections::BTreeMap<String, i64>;

async fn grouped_counts(
    pool: &sqlx::PgPool,
    sql: &str,
    bind_date: Option<chrono::NaiveDate>,
) -> Result<StatusCounts, sqlx::Error> {
    let mut query = sqlx::query(sql);
    if let Some(date) = bind_date {
        query = query.bind(date).bind(collections::weekday_index(date));
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
        .collect())
}

#[get("/dashboard")]
pub async fn dashboard(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let pool = &state.pool;

    let users = sqlx::query(
        r#"SELECT
               COUNT(*) FILTER (WHERE role = 'resident' AND approval_status = 'pending') AS pending,
               COUNT(*) FILTER (WHERE role = 'resident' AND approval_status = 'approved') AS active
           FROM users"#,
    )
    .fetch_one(pool)
    .await?;

    let invoices = sqlx::query(
        r#"SELECT COUNT(*) AS n, COALESCE(SUM(amount), 0)::text AS total
           FROM invoices
           WHERE status IN ('unpaid', 'overdue')"#,
    )
    .fetch_one(pool)
    .await?;

    let awaiting: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payments WHERE method = 'gcash_manual' AND status = 'pending'",
    )
    .fetch_one(pool)
    .await?;

    let subscriptions = grouped_counts(
        pool,
        "SELECT status, COUNT(*) AS n FROM subscriptions GROUP BY status",
        None,
    )
    .await?;

    // Schedules without a row for today count as pending.
    let collections_today = grouped_counts(
        pool,
        r#"SELECT COALESCE(st.status, 'pending') AS status, COUNT(*) AS n
           FROM collection_schedules cs
           LEFT JOIN collection_status st
                  ON st.schedule_id = cs.id AND st.collection_date = $1
           WHERE cs.is_active = true AND cs.weekday = $2
           GROUP BY 1"#,
        Some(local_today()),
    )
    .await?;

    Ok(HttpResponse::Ok().json(Dashboard {
        pending_registrations: users.get("pending"),
        active_residents: users.get("active"),
        subscriptions,
        outstanding_invoices: invoices.get("n"),
        outstanding_amount: invoices.get("total"),
        payments_awaiting_review: awaiting,
        collections_today,
    }))
}
