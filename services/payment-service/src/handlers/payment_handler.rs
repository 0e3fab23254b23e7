use crate::config::AppState;
use crate::domain::click::{
    CheckoutRegistration, ClickRequest, CompleteResponse, CreatePaymentRequest,
    CreatePaymentResponse, PrepareResponse,
};
use crate::domain::registration::{PaymentStatus, PaymentStatusView, Registration, UpdateStatusRequest};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::origin::ClientAddr;
use axum::{
    extract::{FromRequest, Path, Request, State},
    http::header::CONTENT_TYPE,
    response::Json,
    Form,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::convert::Infallible;

/// Body notifikasi Click, JSON atau form-urlencoded.
///
/// Body yang tidak bisa di-parse tidak pernah jadi HTTP error: hasilnya request kosong
/// yang nanti ditolak dengan kode -8.
pub struct ClickPayload(pub ClickRequest);

impl<S> FromRequest<S> for ClickPayload
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);

        let parsed = if is_json {
            Json::<ClickRequest>::from_request(req, state)
                .await
                .map(|Json(body)| body)
                .map_err(|e| e.body_text())
        } else {
            Form::<ClickRequest>::from_request(req, state)
                .await
                .map(|Form(body)| body)
                .map_err(|e| e.body_text())
        };

        Ok(ClickPayload(parsed.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unparseable Click notification body");
            ClickRequest::default()
        })))
    }
}

/// Click prepare callback
#[utoipa::path(
    post,
    path = "/api/payments/click/prepare",
    tag = "Click",
    summary = "Click prepare",
    description = "First phase of the Click handshake. Always HTTP 200, outcome in the `error` field",
    request_body = ClickRequest,
    responses(
        (status = 200, description = "Prepare processed", body = PrepareResponse)
    )
)]
pub async fn click_prepare(
    State(app_state): State<AppState>,
    ClientAddr(source): ClientAddr,
    ClickPayload(request): ClickPayload,
) -> Json<PrepareResponse> {
    Json(app_state.click.handle_prepare(&request, source.as_deref()).await)
}

/// Click complete callback
#[utoipa::path(
    post,
    path = "/api/payments/click/complete",
    tag = "Click",
    summary = "Click complete",
    description = "Second phase of the Click handshake. Always HTTP 200, outcome in the `error` field",
    request_body = ClickRequest,
    responses(
        (status = 200, description = "Complete processed", body = CompleteResponse)
    )
)]
pub async fn click_complete(
    State(app_state): State<AppState>,
    ClientAddr(source): ClientAddr,
    ClickPayload(request): ClickPayload,
) -> Json<CompleteResponse> {
    Json(app_state.click.handle_complete(&request, source.as_deref()).await)
}

/// Create Click checkout links for a registration
#[utoipa::path(
    post,
    path = "/api/payments/click/create-payment",
    tag = "Payment Service",
    summary = "Create checkout links",
    description = "Build the Click redirect URL and pay-by-card JS config for a registration",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Checkout links created", body = serde_json::Value),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Registration not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_payment(
    auth: AuthUser,
    State(app_state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> AppResult<Json<Value>> {
    let registration = load_registration(&app_state, &request.registration_id).await?;
    validate_registration_ownership(&auth, &registration)?;

    if registration.is_paid() {
        return Err(AppError::validation("Registration sudah dibayar"));
    }

    let expected_amount = registration.expected_amount(app_state.config.click.default_amount);
    let amount = request.amount.unwrap_or(expected_amount);
    if amount != expected_amount {
        return Err(AppError::validation("Amount tidak sesuai dengan harga registration"));
    }

    let response = CreatePaymentResponse {
        payment_data: app_state.click.checkout_links(&registration.id, amount),
        amount,
        registration: CheckoutRegistration {
            id: registration.id.clone(),
            student: registration.student_name(),
            phone: registration.phone.clone(),
        },
    };

    tracing::info!(
        "Checkout links created: registration_id={}, amount={}, by={}",
        registration.id,
        amount,
        auth.email
    );

    Ok(Json(json!({
        "success": true,
        "data": response
    })))
}

/// Check payment status
#[utoipa::path(
    get,
    path = "/api/payments/status/{registration_id}",
    tag = "Payment Service",
    summary = "Check payment status",
    params(
        ("registration_id" = String, Path, description = "Registration identifier")
    ),
    responses(
        (status = 200, description = "Payment status retrieved", body = PaymentStatusView),
        (status = 404, description = "Registration not found")
    )
)]
pub async fn check_payment_status(
    State(app_state): State<AppState>,
    Path(registration_id): Path<String>,
) -> AppResult<Json<PaymentStatusView>> {
    let registration = load_registration(&app_state, &registration_id).await?;
    Ok(Json(PaymentStatusView::from(&registration)))
}

/// Manual payment status override
#[utoipa::path(
    post,
    path = "/api/payments/update-status",
    tag = "Payment Service",
    summary = "Update payment status",
    description = "Administrative override of a registration's payment status",
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Payment status updated", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Registration not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_payment_status(
    auth: AuthUser,
    State(app_state): State<AppState>,
    Json(request): Json<UpdateStatusRequest>,
) -> AppResult<Json<Value>> {
    auth.require_admin()?;

    if !shared::is_valid_registration_id(&request.registration_id) {
        return Err(AppError::validation("Registration ID tidak valid"));
    }

    let paid_at = match request.payment_status {
        PaymentStatus::Completed => request.paid_at,
        _ => None,
    };

    let registration = app_state
        .store
        .override_status(&request.registration_id, request.payment_status, paid_at)
        .await?
        .ok_or_else(|| AppError::not_found("Registration not found"))?;

    tracing::warn!(
        "Manual payment status override: registration_id={}, payment_status={}, by={}",
        registration.id,
        registration.payment_status,
        auth.email
    );

    Ok(Json(json!({
        "success": true,
        "message": "Payment status updated successfully",
        "data": {
            "registrationId": registration.id,
            "status": registration.status,
            "paymentStatus": registration.payment_status,
            "updatedAt": registration.updated_at
        }
    })))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Payment Service",
    summary = "Health check",
    responses(
        (status = 200, description = "Service is healthy", body = serde_json::Value)
    )
)]
pub async fn health_check(State(app_state): State<AppState>) -> Json<Value> {
    let health = app_state.health_check().await;

    Json(json!({
        "status": health.overall,
        "database": health.database,
        "service": "payment-service",
        "timestamp": Utc::now(),
        "version": app_state.config.app_version,
    }))
}

/// Get service information
#[utoipa::path(
    get,
    path = "/info",
    tag = "Payment Service",
    summary = "Get service information",
    responses(
        (status = 200, description = "Service information retrieved successfully", body = serde_json::Value)
    )
)]
pub async fn get_service_info(State(app_state): State<AppState>) -> Json<Value> {
    let config = &app_state.config;

    Json(json!({
        "service": "payment-service",
        "version": config.app_version,
        "environment": config.environment,
        "is_production": config.is_production(),
        "payment_provider": "click",
        "click_mode": app_state.click.environment_info(),
        "payment_timeout_minutes": config.click.payment_timeout_minutes,
        "features": [
            "Click prepare/complete handshake",
            "MD5 signature verification",
            "Origin allow-list (production)",
            "Automatic expiry of unconfirmed payments"
        ],
        "timestamp": Utc::now()
    }))
}

// Helper Functions untuk Payment Handlers

async fn load_registration(app_state: &AppState, registration_id: &str) -> AppResult<Registration> {
    if !shared::is_valid_registration_id(registration_id) {
        return Err(AppError::validation("Registration ID tidak valid"));
    }

    app_state
        .store
        .find_by_id(registration_id)
        .await?
        .ok_or_else(|| AppError::not_found("Registration not found"))
}

// Pastikan caller adalah pemilik registration atau admin
fn validate_registration_ownership(auth: &AuthUser, registration: &Registration) -> AppResult<()> {
    if auth.is_admin() || auth.email.eq_ignore_ascii_case(&registration.email) {
        return Ok(());
    }

    tracing::warn!(
        "Unauthorized checkout attempt: registration_id={}, user={}",
        registration.id,
        auth.email
    );
    Err(AppError::forbidden("Anda tidak memiliki akses ke registration ini"))
}
