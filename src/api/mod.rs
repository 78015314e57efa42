//! HTTP intake API.
//!
//! Handlers parse and validate requests, run the synchronous guard check,
//! persist, and hand admitted submissions to the trigger. Business rules
//! live in the other modules.

pub mod routes;
pub mod types;

pub use routes::{serve, AppState};
