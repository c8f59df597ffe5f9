//! Upstream HTTP transport and error taxonomy.

pub mod client;
pub mod errors;

pub use client::UpstreamClient;
pub use errors::{is_historical_state_error, UpstreamError};
