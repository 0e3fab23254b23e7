// JWT validation untuk caller internal (user panel dan admin panel)

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use thiserror::Error;

// Claims structure untuk JWT token
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub token_type: String,
}

// Error types untuk JWT validation
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token invalid atau expired")]
    InvalidToken,
    #[error("JWT secret tidak ditemukan")]
    MissingSecret,
    #[error("Token type tidak valid untuk endpoint ini")]
    InvalidTokenType,
}

// Decode JWT token dan validasi signature
pub fn validate_token(token: &str, secret: &str) -> Result<TokenClaims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::MissingSecret);
    }

    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| JwtError::InvalidToken)?;

    // Business services hanya terima access token
    if token_data.claims.token_type != "access" {
        return Err(JwtError::InvalidTokenType);
    }

    Ok(token_data.claims)
}
