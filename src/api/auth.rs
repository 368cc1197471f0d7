// src/api/auth.rs

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use actix_web::{get, post, put, web, HttpMessage, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::rc::Rc;
use std::task::{Context, Poll};
use utoipa::ToSchema;

use crate::error::{unique_violation, ApiError};
use crate::models::{ApprovalStatus, Role};
use crate::{db, AppState};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i32,
    role: String,
    exp: usize,
}

/// Authenticated caller, placed in request extensions by [`JwtMiddleware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i32,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("{role} access required")))
        }
    }
}

#[derive(Clone)]
pub struct JwtKeys {
    secret: String,
    ttl_days: i64,
}

impl JwtKeys {
    pub fn new(secret: impl Into<String>, ttl_days: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_days,
        }
    }

    pub fn issue(&self, user_id: i32, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = (Utc::now() + Duration::days(self.ttl_days)).timestamp() as usize;

        let claims = Claims {
            sub: user_id,
            role: role.as_str().to_string(),
            exp: expiration,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
    }

    pub fn verify(&self, token: &str) -> Option<AuthUser> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::default(),
        )
        .ok()?;
        Some(AuthUser {
            id: data.claims.sub,
            role: data.claims.role.parse().ok()?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddressInput {
    pub barangay_id: i32,
    pub subdivision_id: Option<i32>,
    pub street: String,
    pub block_lot: Option<String>,
    pub landmark: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub address: AddressInput,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user_id: i32,
    pub approval_status: ApprovalStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: i32,
    pub role: Role,
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len_ok = (3..=32).contains(&username.chars().count());
    let chars_ok = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "username must be 3-32 letters, digits, '_' or '.'",
        ))
    }
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.contains('@') && email.contains('.') {
        Ok(())
    } else {
        Err(ApiError::bad_request("invalid email"))
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() >= 8 {
        Ok(())
    } else {
        Err(ApiError::bad_request("password must be at least 8 characters"))
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::bad_request(format!("{field} is required")))
    } else {
        Ok(())
    }
}

/// Maps a users-table unique violation to the client message.
pub(crate) fn duplicate_user_error(e: sqlx::Error) -> ApiError {
    match unique_violation(&e) {
        Some("users_username_key") => ApiError::bad_request("username already taken"),
        Some("users_email_key") => ApiError::bad_request("email already registered"),
        _ => ApiError::from(e),
    }
}

pub(crate) async fn hash_password(password: String) -> Result<String, ApiError> {
    web::block(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| ApiError::internal("bcrypt blocking error", e))?
        .map_err(|e| ApiError::internal("bcrypt hash error", e))
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered, awaiting approval", body = RegisterResponse),
        (status = 400, description = "Invalid data or duplicate username/email")
    )
)]
#[post("/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&payload.password)?;
    require_non_empty(&payload.full_name, "full_name")?;
    require_non_empty(&payload.address.street, "street")?;
    db::check_location(
        &state.pool,
        payload.address.barangay_id,
        payload.address.subdivision_id,
    )
    .await?;

    let password_hash = hash_password(payload.password).await?;

    let mut tx = state.pool.begin().await?;

    let user_id: i32 = sqlx::query_scalar(
        r#"INSERT INTO users (username, email, password_hash, full_name, phone, role, approval_status)
           VALUES ($1, $2, $3, $4, $5, 'resident', 'pending')
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

    let address = &payload.address;
    sqlx::query(
        r#"INSERT INTO addresses (user_id, barangay_id, subdivision_id, street, block_lot, landmark)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(user_id)
    .bind(address.barangay_id)
    .bind(address.subdivision_id)
    .bind(address.street.trim())
    .bind(address.block_lot.as_deref())
    .bind(address.landmark.as_deref())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    log::info!("resident registered user_id={user_id} username={username}");
    Ok(HttpResponse::Created().json(RegisterResponse {
        user_id,
        approval_status: ApprovalStatus::Pending,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account pending approval or rejected")
    )
)]
#[post("/auth/login")]
pub async fn login(
    state: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let login = payload.login.trim();
    let row = sqlx::query(
        r#"SELECT id, password_hash, role, approval_status
           FROM users
           WHERE username = $1 OR email = LOWER($1)"#,
    )
    .bind(login)
    .fetch_optional(&state.pool)
    .await?;

    let Some(row) = row else {
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    };

    let user_id: i32 = row.get("id");
    let password_hash: String = row.get("password_hash");
    let password = payload.password.clone();

    let matches = web::block(move || verify(password, &password_hash))
        .await
        .map_err(|e| ApiError::internal("bcrypt blocking error", e))?
        .map_err(|e| ApiError::internal("bcrypt verify error", e))?;
    if !matches {
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    let role: Role = crate::models::text_col(&row, "role")?;
    let approval: ApprovalStatus = crate::models::text_col(&row, "approval_status")?;
    match approval {
        ApprovalStatus::Approved => {}
        ApprovalStatus::Pending => {
            return Err(ApiError::forbidden("account is pending approval"))
        }
        ApprovalStatus::Rejected => return Err(ApiError::forbidden("account was rejected")),
    }

    let token = state
        .jwt
        .issue(user_id, role)
        .map_err(|e| ApiError::internal("jwt encode error", e))?;

    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user_id,
        role,
    }))
}

#[get("/me")]
pub async fn me(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ApiError> {
    let profile = db::get_user(&state.pool, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let body = match user.role {
        Role::Resident => {
            let address = db::get_address(&state.pool, user.id).await?;
            json!({ "user": profile, "address": address })
        }
        Role::Collector => {
            let collector = db::get_collector_by_user(&state.pool, user.id).await?;
            json!({ "user": profile, "collector": collector })
        }
        Role::Admin => json!({ "user": profile }),
    };

    Ok(HttpResponse::Ok().json(body))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<AddressInput>,
}

#[put("/me")]
pub async fn update_me(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    if let Some(name) = payload.full_name.as_deref() {
        require_non_empty(name, "full_name")?;
    }

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        r#"UPDATE users
           SET full_name = COALESCE($2, full_name), phone = COALESCE($3, phone), updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(user.id)
    .bind(payload.full_name.as_deref().map(str::trim))
    .bind(payload.phone.as_deref())
    .execute(&mut *tx)
    .await?;

    if let Some(address) = payload.address {
        if user.role != Role::Resident {
            return Err(ApiError::bad_request("only residents have an address"));
        }
        require_non_empty(&address.street, "street")?;
        db::check_location(&state.pool, address.barangay_id, address.subdivision_id).await?;

        sqlx::query(
            r#"INSERT INTO addresses (user_id, barangay_id, subdivision_id, street, block_lot, landmark)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (user_id) DO UPDATE SET
                   barangay_id = EXCLUDED.barangay_id,
                   subdivision_id = EXCLUDED.subdivision_id,
                   street = EXCLUDED.street,
                   block_lot = EXCLUDED.block_lot,
                   landmark = EXCLUDED.landmark"#,
        )
        .bind(user.id)
        .bind(address.barangay_id)
        .bind(address.subdivision_id)
        .bind(address.street.trim())
        .bind(address.block_lot.as_deref())
        .bind(address.landmark.as_deref())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let profile = db::get_user(&state.pool, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(HttpResponse::Ok().json(profile))
}

/// Creates an approved admin unless one already exists.
pub async fn ensure_admin(
    pool: &PgPool,
    username: &str,
    email: &str,
    password: &str,
) -> Result<bool, ApiError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE role = 'admin')")
            .fetch_one(pool)
            .await?;
    if exists {
        return Ok(false);
    }

    let password_hash = hash_password(password.to_string()).await?;
    sqlx::query(
        r#"INSERT INTO users (username, email, password_hash, full_name, role, approval_status)
           VALUES ($1, $2, $3, 'Administrator', 'admin', 'approved')"#,
    )
    .bind(username)
    .bind(email.to_lowercase())
    .bind(password_hash)
    .execute(pool)
    .await
    .map_err(duplicate_user_error)?;

    log::info!("bootstrap admin created username={username}");
    Ok(true)
}

/// Middleware that:
/// - reads `Authorization: Bearer <jwt>`
/// - validates the JWT
/// - puts an [`AuthUser`] into `req.extensions_mut()`
pub struct JwtMiddleware {
    keys: Rc<JwtKeys>,
}

impl JwtMiddleware {
    pub fn new(keys: JwtKeys) -> Self {
        Self { keys: Rc::new(keys) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner {
            service,
            keys: self.keys.clone(),
        }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
    keys: Rc<JwtKeys>,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let auth_header = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        let Some(token) = auth_header.strip_prefix("Bearer ") else {
            return Box::pin(async move {
                Err(ApiError::Unauthorized(
                    "missing or invalid Authorization header".to_string(),
                )
                .into())
            });
        };

        match self.keys.verify(token) {
            Some(user) => {
                req.extensions_mut().insert(user);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            None => Box::pin(async move {
                Err(ApiError::Unauthorized("invalid token".to_string()).into())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_carries_role() {
        let keys = JwtKeys::new("test-secret", 1);
        let token = keys.issue(7, Role::Collector).unwrap();
        assert_eq!(
            keys.verify(&token),
            Some(AuthUser {
                id: 7,
                role: Role::Collector
            })
        );
        assert_eq!(JwtKeys::new("other-secret", 1).verify(&token), None);
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("juan.dela_cruz").is_ok());
        assert!(validate_username("jd").is_err());
        assert!(validate_username("juan dela cruz").is_err());
    }

    #[test]
    fn role_gate() {
        let user = AuthUser {
            id: 1,
            role: Role::Resident,
        };
        assert!(user.require(Role::Resident).is_ok());
        assert!(user.require(Role::Admin).is_err());
    }
}
