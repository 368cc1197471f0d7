// src/api/collections.rs

use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;

use crate::api::auth::AuthUser;
use crate::collections::{self, NewSchedule};
use crate::error::ApiError;
use crate::models::{CollectionStatus, Role, WasteType};
use crate::ws::{CollectionEvent, NotifyBarangay};
use crate::{db, local_today, AppState};

async fn resident_barangay(state: &AppState, user: &AuthUser) -> Result<i32, ApiError> {
    user.require(Role::Resident)?;
    collections::resident_barangay(&state.pool, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("no address on file"))
}

async fn collector_id(state: &AppState, user: &AuthUser) -> Result<i32, ApiError> {
    user.require(Role::Collector)?;
    let collector = db::get_collector_by_user(&state.pool, user.id)
        .await?
        .filter(|c| c.is_active)
        .ok_or_else(|| ApiError::forbidden("collector profile is not active"))?;
    Ok(collector.id)
}

#[get("/collections/schedule")]
pub async fn weekly_schedule(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let barangay_id = resident_barangay(&state, &user).await?;
    let schedules = collections::weekly_schedule(&state.pool, barangay_id).await?;
    Ok(HttpResponse::Ok().json(schedules))
}

#[get("/collections/today")]
pub async fn today(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let barangay_id = resident_barangay(&state, &user).await?;
    let days = collections::schedules_for_day(&state.pool, &[barangay_id], local_today()).await?;
    Ok(HttpResponse::Ok().json(days))
}

#[get("/collector/route")]
pub async fn collector_route(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let collector_id = collector_id(&state, &user).await?;
    let barangays = collections::collector_barangay_ids(&state.pool, collector_id).await?;
    let days = collections::schedules_for_day(&state.pool, &barangays, local_today()).await?;
    Ok(HttpResponse::Ok().json(days))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: CollectionStatus,
    pub note: Option<String>,
}

#[put("/collector/schedules/{id}/status")]
pub async fn update_status(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<StatusUpdateRequest>,
) -> Result<HttpResponse, ApiError> {
    let collector_id = collector_id(&state, &user).await?;
    let payload = payload.into_inner();
    let note = payload.note.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let day = collections::update_status(
        &state.pool,
        collector_id,
        path.into_inner(),
        payload.status,
        note,
        local_today(),
    )
    .await?;

    state.ws_hub.do_send(NotifyBarangay {
        barangay_id: day.schedule.barangay_id,
        event: CollectionEvent::status_updated(day.clone()),
    });

    Ok(HttpResponse::Ok().json(day))
}

// Admin

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub barangay_id: i32,
    pub weekday: i16,
    pub waste_type: WasteType,
    pub start_time: String,
    pub end_time: String,
}

#[post("/schedules")]
pub async fn create_schedule(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CreateScheduleRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let new = NewSchedule::parse(
        payload.barangay_id,
        payload.weekday,
        payload.waste_type,
        &payload.start_time,
        &payload.end_time,
    )?;
    db::check_location(&state.pool, new.barangay_id, None).await?;

    let schedule = collections::create_schedule(&state.pool, &new).await?;
    log::info!(
        "schedule created id={} barangay_id={} weekday={}",
        schedule.id,
        schedule.barangay_id,
        schedule.weekday
    );
    Ok(HttpResponse::Created().json(schedule))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleFilter {
    pub barangay_id: Option<i32>,
}

#[get("/schedules")]
pub async fn list_schedules(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<ScheduleFilter>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let schedules = collections::list_schedules(&state.pool, query.barangay_id).await?;
    Ok(HttpResponse::Ok().json(schedules))
}

#[delete("/schedules/{id}")]
pub async fn delete_schedule(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    if !collections::deactivate_schedule(&state.pool, path.into_inner()).await? {
        return Err(ApiError::not_found("schedule not found"));
    }
    Ok(HttpResponse::NoContent().finish())
}
