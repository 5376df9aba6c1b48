//! Server-side HTTP response caching for axum.

pub mod cache;
pub mod config;
pub mod infra;
