//! Shared building blocks for the domain toolkit.
//!
//! This crate provides:
//! - `EntityId`, the identity newtype used across all crates
//! - The `Reason`/`Error` composite for structured failure reporting
//! - `CancellationToken` for cooperative cancellation of save operations

pub mod cancel;
pub mod reason;
pub mod types;

pub use cancel::CancellationToken;
pub use reason::{Error, Reason};
pub use types::EntityId;
