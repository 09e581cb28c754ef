pub mod cache_admin;
pub mod error;
