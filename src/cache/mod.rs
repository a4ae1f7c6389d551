pub mod field_cache;
pub mod models;
pub mod persistence;
