//! Domain layer - entities and traits

pub mod entities;
pub mod traits;
