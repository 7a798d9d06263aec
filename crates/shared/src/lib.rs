//! TollGate Shared Types and Store
//!
//! This crate contains the domain types, the store abstraction, and its
//! Postgres and in-memory implementations shared across the TollGate
//! platform.

pub mod db;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use db::*;
pub use error::*;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::Store;
pub use types::*;
