// Shared helpers untuk semua services

pub mod utils;

pub use utils::token_extraction::extract_client_ip;
pub use utils::validation::{is_valid_registration_id, parse_amount};
