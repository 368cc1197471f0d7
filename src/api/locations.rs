use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;

use crate::api::auth::AuthUser;
use crate::error::{unique_violation, ApiError};
use crate::models::{Barangay, Role, Subdivision};
use crate::{db, AppState};

/// Public: the registration form needs it before the resident has a token.
#[get("/barangays")]
pub async fn list_barangays(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let barangays = db::list_barangays(&state.pool).await?;
    Ok(HttpResponse::Ok().json(barangays))
}

#[derive(Debug, Deserialize)]
pub struct CreateBarangayRequest {
    pub name: String,
    pub city: String,
}

#[post("/barangays")]
pub async fn create_barangay(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CreateBarangayRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let name = payload.name.trim();
    let city = payload.city.trim();
    if name.is_empty() || city.is_empty() {
        return Err(ApiError::bad_request("name and city are required"));
    }

    let barangay = sqlx::query_as::<_, Barangay>(
        "INSERT INTO barangays (name, city) VALUES ($1, $2) RETURNING id, name, city",
    )
    .bind(name)
    .bind(city)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some("barangays_name_key") => ApiError::bad_request("barangay already exists"),
        _ => ApiError::from(e),
    })?;

    Ok(HttpResponse::Created().json(barangay))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubdivisionRequest {
    pub name: String,
}

#[post("/barangays/{id}/subdivisions")]
pub async fn create_subdivision(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<CreateSubdivisionRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require(Role::Admin)?;
    let barangay_id = path.into_inner();
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM barangays WHERE id = $1)")
        .bind(barangay_id)
        .fetch_one(&state.pool)
        .await?;
    if !exists {
        return Err(ApiError::not_found("barangay not found"));
    }

    let subdivision = sqlx::query_as::<_, Subdivision>(
        "INSERT INTO subdivisions (barangay_id, name) VALUES ($1, $2) RETURNING id, barangay_id, name",
    )
    .bind(barangay_id)
    .bind(name)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some("subdivisions_barangay_name_key") => {
            ApiError::bad_request("subdivision already exists in this barangay")
        }
        _ => ApiError::from(e),
    })?;

    Ok(HttpResponse::Created().json(subdivision))
}
