//! Data models for the notes backend.
//!
//! Field names serialize in camelCase to match the web client.

mod collaborator;
mod document;
mod revision;

pub use collaborator::*;
pub use document::*;
pub use revision::*;
