//! # ms-av
//!
//! External tool management, encoder invocation and scratch storage for the
//! mediasqueeze pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to ffmpeg.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes from structured argument lists.
//! - **Encoding** ([`Encoder`], [`FfmpegEncoder`]) -- turn a profile into an
//!   ffmpeg invocation for one input file.
//! - **Scratch storage** ([`ScratchStorage`], [`ScratchDir`]) -- per-job
//!   directory trees with idempotent release.

pub mod command;
pub mod encoder;
pub mod storage;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use encoder::{EncodeRequest, Encoder, FfmpegEncoder};
pub use storage::{sanitize_file_name, ScratchDir, ScratchStorage};
pub use tools::{ToolInfo, ToolRegistry};
