//! Remote store access for the expenses backend.
//!
//! Provides the HTTP client with API-key/session header injection, the
//! `expenses` row type, row inserts, session identity lookup, and the health
//! endpoint used as a reachability probe.

pub mod auth;
pub mod client;
pub mod expenses;
pub mod health;
pub mod types;

pub use client::{ApiClient, RemoteError};
pub use types::ExpenseRecord;
