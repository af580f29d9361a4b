//! Application layer - services and errors

pub mod errors;
pub mod services;
