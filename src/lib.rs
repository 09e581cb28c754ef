//! Fail-open cache-aside layer for axum services.
//!
//! Reads pass through [`cache::read_through_layer`], writes through
//! [`cache::invalidation_layer`], both backed by one shared [`cache::CacheStore`].

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod identity;
pub mod infra;

pub use identity::CallerIdentity;
