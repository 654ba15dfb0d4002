//! Authentication handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::{ClientInfo, CurrentUser};
use crate::services::auth::{LoginResponse, TotpEnrollment, TotpVerification};
use crate::services::AuthService;
use crate::AppState;
use shared::models::{summarize_user_agent, Employee};

#[derive(Deserialize, Default)]
pub struct InitAdminRequest {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct EmpIdRequest {
    pub emp_id: String,
}

#[derive(Deserialize)]
pub struct TotpCodeRequest {
    pub emp_id: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

/// Create the admin account on a fresh install
pub async fn init_admin(
    State(state): State<AppState>,
    body: Option<Json<InitAdminRequest>>,
) -> Result<(StatusCode, Json<TotpEnrollment>), AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    let enrollment = auth_service.init_admin(body.name).await?;

    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// Provisioning URI for an authenticator app
pub async fn totp_qr(
    State(state): State<AppState>,
    Json(body): Json<EmpIdRequest>,
) -> Result<Json<TotpEnrollment>, AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    Ok(Json(auth_service.totp_enrollment(body.emp_id.trim()).await?))
}

pub async fn verify_totp(
    State(state): State<AppState>,
    Json(body): Json<TotpCodeRequest>,
) -> Result<Json<TotpVerification>, AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    Ok(Json(auth_service.verify_totp(body.emp_id.trim(), &body.code).await?))
}

/// Login endpoint handler
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<TotpCodeRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let login_device = summarize_user_agent(&client.user_agent).to_string();
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    let response = auth_service.login(&body.emp_id, &body.code, &login_device).await?;

    Ok(Json(response))
}

/// Exchange a recently expired token for a fresh one
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    Ok(Json(auth_service.refresh(&body.token).await?))
}

pub async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Employee>, AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    Ok(Json(auth_service.me(&user.emp_id).await?))
}
