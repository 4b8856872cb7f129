//! Transport for running the pipeline against the local filesystem.
//!
//! Submitted files are referenced by path and copied into scratch. Profile
//! requests and job results are forwarded as [`LocalEvent`]s on a channel so
//! the caller can answer choices and report progress.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

use ms_core::{Error, JobId, OwnerSession, Profile};
use ms_pipeline::{Deliverable, FileReference, JobReport, Transport};

/// Something the pipeline told the local transport.
#[derive(Debug, Clone)]
pub enum LocalEvent {
    ProfileRequested {
        owner: OwnerSession,
        job_id: JobId,
        offered: Vec<Profile>,
    },
    Delivered {
        job_id: JobId,
        /// Where the deliverable was copied to.
        path: PathBuf,
        report: JobReport,
    },
    Failed {
        job_id: JobId,
        kind: &'static str,
        message: String,
    },
}

impl LocalEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::ProfileRequested { job_id, .. }
            | Self::Delivered { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }
}

/// Filesystem-backed [`Transport`].
#[derive(Debug)]
pub struct LocalTransport {
    out_dir: PathBuf,
    events: mpsc::UnboundedSender<LocalEvent>,
}

impl LocalTransport {
    /// Deliverables are copied into `out_dir`.
    pub fn new(out_dir: impl Into<PathBuf>) -> (Self, mpsc::UnboundedReceiver<LocalEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                out_dir: out_dir.into(),
                events,
            },
            rx,
        )
    }

    /// Reference a local file for submission.
    pub async fn reference(path: &Path) -> ms_core::Result<FileReference> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileReference::new(path.to_string_lossy()).with_size(meta.len()))
    }

    fn emit(&self, event: LocalEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Local event receiver is gone");
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn fetch(&self, file: &FileReference, dest: &Path) -> ms_core::Result<()> {
        let src = Path::new(&file.unique_id);
        tokio::fs::copy(src, dest)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot read {}: {e}", src.display())))?;
        Ok(())
    }

    async fn request_profile(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        offered: &[Profile],
    ) -> ms_core::Result<()> {
        self.emit(LocalEvent::ProfileRequested {
            owner: owner.clone(),
            job_id: job_id.clone(),
            offered: offered.to_vec(),
        });
        Ok(())
    }

    async fn on_delivered(
        &self,
        _owner: &OwnerSession,
        job_id: &JobId,
        deliverable: &Deliverable,
        report: &JobReport,
    ) -> ms_core::Result<()> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| Error::Delivery(format!("cannot create {}: {e}", self.out_dir.display())))?;

        let target = self.out_dir.join(&deliverable.file_name);
        tokio::fs::copy(&deliverable.path, &target)
            .await
            .map_err(|e| Error::Delivery(format!("cannot write {}: {e}", target.display())))?;

        self.emit(LocalEvent::Delivered {
            job_id: job_id.clone(),
            path: target,
            report: report.clone(),
        });
        Ok(())
    }

    async fn on_failed(&self, _owner: &OwnerSession, job_id: &JobId, reason: &Error) {
        self.emit(LocalEvent::Failed {
            job_id: job_id.clone(),
            kind: reason.kind(),
            message: reason.to_string(),
        });
    }
}
