//! The boundary between the pipeline and whatever carries files and messages
//! to and from the requester (a chat bot, an HTTP front end, the CLI).

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ms_core::{Error, JobId, OwnerSession, Profile};

use crate::job::JobReport;
use crate::packager::Deliverable;

/// Opaque handle to a submitted file held by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Transport-specific identifier; stable across retries.
    pub unique_id: String,
    /// Size announced by the transport, if known.
    pub size_hint: Option<u64>,
}

impl FileReference {
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            size_hint: None,
        }
    }

    pub fn with_size(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }
}

/// Transport operations the pipeline depends on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download the submitted file to `dest`.
    async fn fetch(&self, file: &FileReference, dest: &Path) -> ms_core::Result<()>;

    /// Present the offered profiles to the owner. The answer comes back
    /// through `Pipeline::choose_profile`.
    async fn request_profile(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        offered: &[Profile],
    ) -> ms_core::Result<()>;

    /// Hand over the finished deliverable.
    ///
    /// The deliverable lives in scratch storage that is removed as soon as
    /// this returns, so implementations must finish reading it first.
    async fn on_delivered(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        deliverable: &Deliverable,
        report: &JobReport,
    ) -> ms_core::Result<()>;

    /// Tell the owner the job failed or expired.
    async fn on_failed(&self, owner: &OwnerSession, job_id: &JobId, reason: &Error);
}
