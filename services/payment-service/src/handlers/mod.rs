pub mod click_service;
pub mod payment_handler;
