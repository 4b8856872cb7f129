//! mediasqueeze - compress audio and video submissions to a chosen profile
//!
//! This library crate exposes the local transport used by the CLI, for
//! integration testing.

pub mod local;

pub use local::{LocalEvent, LocalTransport};
