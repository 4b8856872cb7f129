//! Guaranteed end-of-job handling.
//!
//! A [`JobGuard`] exists from the moment a job's scratch tree is allocated.
//! [`JobGuard::finalize`] consumes it, so each job is reported and cleaned up
//! exactly once. A guard dropped without being finalized (panic, aborted
//! task) still removes the tree and frees the owner's slot.

use std::time::Duration;

use ms_av::ScratchStorage;
use ms_core::{Error, JobId, OwnerSession};

use crate::job::{Job, JobReport, JobState};
use crate::packager::Deliverable;
use crate::session::SessionStore;
use crate::transport::Transport;

/// Owns the release of one job's scratch tree and session slot.
#[derive(Debug)]
pub struct JobGuard {
    storage: ScratchStorage,
    sessions: SessionStore,
    job_id: JobId,
    owner: OwnerSession,
    transport_timeout: Duration,
    armed: bool,
}

impl JobGuard {
    pub fn new(
        storage: ScratchStorage,
        sessions: SessionStore,
        job_id: JobId,
        owner: OwnerSession,
        transport_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            sessions,
            job_id,
            owner,
            transport_timeout,
            armed: true,
        }
    }

    /// Report the job's result, move it to its terminal state, and release
    /// everything it holds.
    ///
    /// A failed or timed-out hand-over of the deliverable turns the job into
    /// a failure that is reported through [`Transport::on_failed`]. A job
    /// whose profile wait ended without a choice (timeout, shutdown or a
    /// newer submission) ends `Expired`; every other failure ends `Failed`.
    /// Returns the terminal state reached.
    pub async fn finalize(
        mut self,
        transport: &dyn Transport,
        job: &mut Job,
        result: ms_core::Result<(Deliverable, JobReport)>,
    ) -> JobState {
        let failure = match result {
            Ok((deliverable, report)) => {
                let handed_over = tokio::time::timeout(
                    self.transport_timeout,
                    transport.on_delivered(&self.owner, &self.job_id, &deliverable, &report),
                )
                .await;
                match handed_over {
                    Ok(Ok(())) => None,
                    Ok(Err(e @ Error::Delivery(_))) => Some(e),
                    Ok(Err(other)) => Some(Error::Delivery(other.to_string())),
                    Err(_) => Some(Error::Delivery(format!(
                        "hand-over timed out after {}s",
                        self.transport_timeout.as_secs()
                    ))),
                }
            }
            Err(e) => Some(e),
        };

        let terminal = match &failure {
            None => JobState::Delivered,
            Some(Error::SelectionTimeout { .. } | Error::Cancelled | Error::Superseded)
                if job.state() == JobState::AwaitingProfile =>
            {
                JobState::Expired
            }
            Some(_) => JobState::Failed,
        };
        if let Err(e) = job.advance(terminal) {
            tracing::error!(job_id = %self.job_id, error = %e, "Could not record terminal state");
        }

        match &failure {
            None => tracing::info!(job_id = %self.job_id, owner = %self.owner, "Job delivered"),
            Some(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    owner = %self.owner,
                    kind = e.kind(),
                    "Job {terminal}: {e}"
                );
                let notify = transport.on_failed(&self.owner, &self.job_id, e);
                if tokio::time::timeout(self.transport_timeout, notify).await.is_err() {
                    tracing::warn!(job_id = %self.job_id, "Failure notification timed out");
                }
            }
        }

        self.armed = false;
        let storage = self.storage.clone();
        let job_id = self.job_id.clone();
        match tokio::task::spawn_blocking(move || storage.release(&job_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(job_id = %self.job_id, "Scratch cleanup failed: {e}"),
            Err(e) => tracing::error!(job_id = %self.job_id, "Scratch cleanup task failed: {e}"),
        }
        self.sessions.release(&self.owner, &self.job_id);

        terminal
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(job_id = %self.job_id, "Job ended without finalizing; cleaning up");
        if let Err(e) = self.storage.release(&self.job_id) {
            tracing::error!(job_id = %self.job_id, "Scratch cleanup failed: {e}");
        }
        self.sessions.release(&self.owner, &self.job_id);
    }
}
