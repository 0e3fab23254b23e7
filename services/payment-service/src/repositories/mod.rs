pub mod registration_repo;

#[cfg(test)]
pub mod memory;
