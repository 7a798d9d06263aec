//! TollGate API Library
//!
//! This crate contains the API server components for TollGate: the
//! execution gateway, credential resolution, backend redaction, and the
//! HTTP surface.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod redaction;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
