// JWT-Only Authentication Middleware untuk endpoint internal

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use crate::{config::AppState, error::AppError, utils::jwt};

// Authentication context untuk user yang sudah terautentikasi
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Hanya admin yang boleh mengakses endpoint ini"))
        }
    }
}

// Axum extractor implementation untuk AuthUser
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

// Extract Bearer token dari Authorization header
fn extract_jwt_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Authorization header dengan Bearer token diperlukan"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Invalid Authorization header format"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .ok_or_else(|| AppError::unauthorized("Bearer token format diperlukan"))
}

// JWT authentication middleware
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    let token = extract_jwt_token(request.headers())?;

    let claims = jwt::validate_token(&token, &state.config.jwt_secret)?;

    let auth_user = AuthUser {
        user_id: claims.sub,
        email: claims.email,
        role: claims.role,
    };

    request.extensions_mut().insert(auth_user.clone());

    // Security audit log
    tracing::debug!(
        "User authenticated - ID: {}, Email: {}, Role: {}, Endpoint: {}",
        auth_user.user_id,
        auth_user.email,
        auth_user.role,
        path
    );

    Ok(next.run(request).await)
}
