//! ms-core: shared types, IDs, errors, and configuration.
//!
//! This crate is the foundational dependency for the other ms-* crates,
//! providing job and session identifiers, the unified error type, the
//! media-domain enums (input kinds, media kinds, output profiles), and the
//! pipeline configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
