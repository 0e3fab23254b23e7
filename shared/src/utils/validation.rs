use bigdecimal::BigDecimal;
use std::str::FromStr;

// Validate registration ID (alphanumeric, dash, underscore, max 64 char)
pub fn is_valid_registration_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// Parse amount string secara exact (tanpa floating point)
pub fn parse_amount(raw: &str) -> Option<BigDecimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('+') {
        return None;
    }

    BigDecimal::from_str(trimmed).ok()
}
