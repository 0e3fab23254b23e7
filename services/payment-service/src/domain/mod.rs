pub mod click;
pub mod registration;
