//! # ms-pipeline
//!
//! Orchestration of media-compression jobs.
//!
//! This crate provides:
//!
//! - **[`archive`]** -- input kind detection, safe zip extraction, and
//!   extension-based classification.
//! - **[`Job`]** / **[`JobState`]** -- the per-job record and its checked
//!   state machine.
//! - **[`SessionStore`]** -- the live job of every owner session, profile
//!   selection hand-off, expiry, and conflict policy.
//! - **[`Dispatcher`]** -- runs the encoder per input under a global worker
//!   bound, isolating failures and preserving input order.
//! - **[`packager`]** -- turns successful outputs into one deliverable.
//! - **[`JobGuard`]** -- guaranteed storage and session release.
//! - **[`Pipeline`]** -- ties it together behind the `submit` /
//!   `choose_profile` boundary and reports through a [`Transport`].

pub mod archive;
pub mod cleanup;
pub mod dispatcher;
pub mod job;
pub mod packager;
pub mod pipeline;
pub mod session;
pub mod transport;

// Re-export key types at the crate root.
pub use cleanup::JobGuard;
pub use dispatcher::Dispatcher;
pub use job::{InputFileRecord, InputOutcome, Job, JobReport, JobState, Outcome};
pub use packager::{Deliverable, DeliverableKind};
pub use pipeline::Pipeline;
pub use session::SessionStore;
pub use transport::{FileReference, Transport};
