//! `inferq-core`: shared building blocks.
//!
//! Identifiers and the domain error type used by every other crate. No runtime
//! or infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{JobId, ModelName};
