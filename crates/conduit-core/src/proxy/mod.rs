//! Request dispatch: coalescing, quality inspection, and primary/fallback
//! orchestration.

pub mod coalesce;
pub mod engine;
pub mod errors;
pub mod quality;

pub use coalesce::{Coalescer, Role};
pub use engine::ProxyEngine;
pub use errors::{DispatchError, ProxyError};
