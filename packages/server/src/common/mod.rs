// Common types and utilities shared across the application

pub mod lookup;
pub mod utils;

pub use lookup::Lookup;
