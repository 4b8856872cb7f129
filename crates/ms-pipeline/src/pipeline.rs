//! Job orchestration.
//!
//! [`Pipeline::submit`] claims the owner's session slot, allocates scratch
//! storage and spawns one task per job. That task walks the job through
//! ingestion, profile selection, dispatch and packaging, and always ends in
//! [`JobGuard::finalize`].

use std::path::Path;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use ms_av::storage::INPUT_DIR;
use ms_av::{Encoder, ScratchStorage};
use ms_core::config::{Config, MixedArchivePolicy};
use ms_core::{Error, InputKind, JobId, MediaKind, OwnerSession, Profile};

use crate::archive::{self, Expansion};
use crate::cleanup::JobGuard;
use crate::dispatcher::Dispatcher;
use crate::job::{InputFileRecord, Job, JobReport, JobState};
use crate::packager::{self, Deliverable};
use crate::session::SessionStore;
use crate::transport::{FileReference, Transport};

/// Handle to the running pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    storage: ScratchStorage,
    sessions: SessionStore,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// How the selection wait ended.
enum Selection {
    Chosen(Result<Profile, oneshot::error::RecvError>),
    Cancelled,
    TimedOut,
}

impl Pipeline {
    /// Build a pipeline with a fresh session store using the configured
    /// conflict policy.
    pub fn new(config: Config, encoder: Arc<dyn Encoder>, transport: Arc<dyn Transport>) -> Self {
        let sessions = SessionStore::new(config.session.conflict_policy);
        Self::with_sessions(config, sessions, encoder, transport)
    }

    pub fn with_sessions(
        config: Config,
        sessions: SessionStore,
        encoder: Arc<dyn Encoder>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let storage = ScratchStorage::new(&config.storage.root);
        let dispatcher = Dispatcher::new(encoder, config.encoder.workers, config.encoder.timeout());
        tracing::info!(
            root = %config.storage.root.display(),
            workers = dispatcher.workers(),
            "Pipeline ready"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                storage,
                sessions,
                dispatcher,
                transport,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Accept a submitted file and start its job.
    ///
    /// # Errors
    ///
    /// - [`Error::Ingestion`] if the announced size is over the limit or
    ///   scratch storage cannot be allocated.
    /// - [`Error::SessionBusy`] if the owner already has a live job that the
    ///   conflict policy keeps.
    /// - [`Error::Cancelled`] after [`Pipeline::shutdown`].
    pub fn submit(
        &self,
        owner: OwnerSession,
        file: FileReference,
        declared_name: &str,
        declared_mime: Option<&str>,
    ) -> ms_core::Result<JobId> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let max = inner.config.storage.max_input_bytes;
        if let Some(size) = file.size_hint.filter(|&s| s > max) {
            return Err(Error::Ingestion(format!(
                "{declared_name} is {size} bytes; the limit is {max}"
            )));
        }

        let job_id = JobId::derive(&file.unique_id);
        let cancel = inner.sessions.claim(&owner, &job_id, &inner.shutdown)?;

        let scratch = match inner.storage.allocate(&job_id) {
            Ok(scratch) => scratch,
            Err(e) => {
                inner.sessions.release(&owner, &job_id);
                return Err(Error::Ingestion(format!("cannot allocate scratch storage: {e}")));
            }
        };
        let guard = JobGuard::new(
            inner.storage.clone(),
            inner.sessions.clone(),
            job_id.clone(),
            owner.clone(),
            inner.config.transport.timeout(),
        );

        let input_kind = archive::detect_input_kind(declared_name, declared_mime);
        let job = Job::new(job_id.clone(), owner, input_kind, scratch);
        tracing::info!(
            job_id = %job_id,
            owner = %job.owner,
            input_kind = %input_kind,
            "Accepted {declared_name}"
        );

        let pipeline = self.clone();
        let declared_name = declared_name.to_string();
        inner.tracker.spawn(async move {
            pipeline.run_job(job, guard, file, declared_name, cancel).await;
        });

        Ok(job_id)
    }

    /// Forward the owner's profile choice to the waiting job.
    ///
    /// # Errors
    ///
    /// [`Error::StaleSelection`] or [`Error::InvalidProfile`]; the job is left
    /// untouched in both cases.
    pub fn choose_profile(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        profile_id: &str,
    ) -> ms_core::Result<()> {
        self.inner.sessions.choose(owner, job_id, profile_id).map(|_| ())
    }

    /// Withdraw the owner's live job. It fails as cancelled and cleans up in
    /// the background.
    ///
    /// # Errors
    ///
    /// [`Error::StaleSelection`] if `job_id` is not the owner's live job.
    pub fn cancel(&self, owner: &OwnerSession, job_id: &JobId) -> ms_core::Result<()> {
        if self.inner.sessions.withdraw(owner, job_id) {
            tracing::info!(owner = %owner, job_id = %job_id, "Job withdrawn");
            Ok(())
        } else {
            Err(Error::stale(job_id, "not a live job of this owner"))
        }
    }

    /// Current state of a live job.
    pub fn job_state(&self, job_id: &JobId) -> Option<JobState> {
        self.inner.sessions.state_of(job_id)
    }

    /// Cancel every pending job and wait for all of them to clean up.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down pipeline");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!("Pipeline stopped");
    }

    async fn run_job(
        self,
        mut job: Job,
        guard: JobGuard,
        file: FileReference,
        declared_name: String,
        cancel: CancellationToken,
    ) {
        let result = self.drive(&mut job, &file, &declared_name, &cancel).await;
        let terminal = guard
            .finalize(self.inner.transport.as_ref(), &mut job, result)
            .await;
        tracing::info!(
            job_id = %job.id,
            state = %terminal,
            elapsed_ms = (chrono::Utc::now() - job.created_at).num_milliseconds(),
            "Job finished"
        );
    }

    async fn drive(
        &self,
        job: &mut Job,
        file: &FileReference,
        declared_name: &str,
        cancel: &CancellationToken,
    ) -> ms_core::Result<(Deliverable, JobReport)> {
        let inner = &self.inner;
        let transport_window = inner.config.transport.timeout();
        self.transition(job, JobState::AwaitingInput)?;

        let dest = job.scratch.file_in(INPUT_DIR, declared_name);
        tokio::select! {
            fetched = tokio::time::timeout(transport_window, inner.transport.fetch(file, &dest)) => {
                match fetched {
                    Ok(Ok(())) => {}
                    Ok(Err(e @ Error::Ingestion(_))) => return Err(e),
                    Ok(Err(other)) => return Err(Error::Ingestion(format!("fetch failed: {other}"))),
                    Err(_) => {
                        return Err(Error::Ingestion(format!(
                            "fetch timed out after {}s",
                            transport_window.as_secs()
                        )));
                    }
                }
            }
            _ = cancel.cancelled() => return Err(self.cancel_reason(job)),
        }
        self.ingest(job, &dest, declared_name).await?;

        let offered = Profile::offered_for(
            job.inputs.iter().any(|i| i.media_kind == MediaKind::Audio),
            job.inputs.iter().any(|i| i.media_kind == MediaKind::Video),
        );
        job.advance(JobState::AwaitingProfile)?;
        let rx = inner
            .sessions
            .await_selection(&job.owner, &job.id, offered.clone())?;
        tracing::info!(job_id = %job.id, state = %JobState::AwaitingProfile, "Offering {} profiles", offered.len());
        let requested = tokio::time::timeout(
            transport_window,
            inner.transport.request_profile(&job.owner, &job.id, &offered),
        )
        .await;
        match requested {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Delivery(format!(
                    "profile request timed out after {}s",
                    transport_window.as_secs()
                )));
            }
        }

        let profile = self.wait_for_profile(job, rx, cancel).await?;
        job.profile = Some(profile);
        self.transition(job, JobState::Transcoding)?;

        let outcomes = inner
            .dispatcher
            .dispatch(
                &job.id,
                &job.inputs,
                profile,
                &job.scratch.output_dir(),
                cancel,
            )
            .await;
        if cancel.is_cancelled() {
            return Err(self.cancel_reason(job));
        }
        job.set_results(outcomes)?;

        if !job.has_success() {
            let report = job.report();
            return Err(Error::AllEncodesFailed {
                count: report.outcomes.len(),
                detail: report.failure_lines().join("; "),
            });
        }

        self.transition(job, JobState::Packaging)?;
        let deliverable = packager::package(&job.id, job.results(), &job.scratch.package_dir()).await?;
        Ok((deliverable, job.report()))
    }

    /// Check the fetched file and turn it into classified inputs.
    async fn ingest(&self, job: &mut Job, fetched: &Path, declared_name: &str) -> ms_core::Result<()> {
        let storage = &self.inner.config.storage;

        let size = tokio::fs::metadata(fetched)
            .await
            .map_err(|e| Error::Ingestion(format!("fetched file is unreadable: {e}")))?
            .len();
        if size > storage.max_input_bytes {
            return Err(Error::Ingestion(format!(
                "{declared_name} is {size} bytes; the limit is {}",
                storage.max_input_bytes
            )));
        }

        let expansion = match job.input_kind {
            InputKind::Unsupported => {
                return Err(Error::UnsupportedInput(format!(
                    "{declared_name} is not an audio, video or zip file"
                )));
            }
            InputKind::Archive => {
                let (archive, target, limit) = (
                    fetched.to_path_buf(),
                    job.scratch.extract_dir(),
                    storage.max_extracted_bytes,
                );
                tokio::task::spawn_blocking(move || archive::expand(&archive, &target, limit))
                    .await
                    .map_err(|e| Error::Internal(format!("extraction task failed: {e}")))??
            }
            kind => Expansion {
                inputs: kind
                    .single_media_kind()
                    .map(|media_kind| InputFileRecord {
                        path: fetched.to_path_buf(),
                        media_kind,
                        original_name: declared_name.to_string(),
                    })
                    .into_iter()
                    .collect(),
                ignored: Vec::new(),
            },
        };

        if let Some(stray) = expansion.inputs.iter().find(|i| !job.scratch.contains(&i.path)) {
            return Err(Error::CorruptArchive(format!(
                "{} resolved outside the job's scratch tree",
                stray.original_name
            )));
        }
        if expansion.inputs.is_empty() {
            return Err(Error::UnsupportedInput(
                "no audio or video files found".to_string(),
            ));
        }
        if expansion.is_mixed()
            && self.inner.config.archive.mixed_policy == MixedArchivePolicy::Reject
        {
            return Err(Error::UnsupportedInput(
                "archive mixes audio and video".to_string(),
            ));
        }

        tracing::info!(
            job_id = %job.id,
            "Ingested {} media inputs ({} ignored)",
            expansion.inputs.len(),
            expansion.ignored.len()
        );
        job.inputs = expansion.inputs;
        job.ignored = expansion.ignored;
        Ok(())
    }

    async fn wait_for_profile(
        &self,
        job: &Job,
        mut rx: oneshot::Receiver<Profile>,
        cancel: &CancellationToken,
    ) -> ms_core::Result<Profile> {
        let inner = &self.inner;
        let window = inner.config.session.selection_timeout();

        let selection = tokio::select! {
            chosen = &mut rx => Selection::Chosen(chosen),
            _ = cancel.cancelled() => Selection::Cancelled,
            _ = tokio::time::sleep(window) => Selection::TimedOut,
        };

        let chosen = match selection {
            Selection::Chosen(chosen) => chosen,
            Selection::Cancelled => return Err(self.cancel_reason(job)),
            Selection::TimedOut => {
                if inner.sessions.expire(&job.owner, &job.id) {
                    return Err(Error::SelectionTimeout {
                        job_id: job.id.to_string(),
                        waited_secs: window.as_secs(),
                    });
                }
                // A choice landed just as the window closed.
                rx.await
            }
        };

        chosen.map_err(|_| self.cancel_reason(job))
    }

    /// Error recorded for a job whose token was cancelled. A superseded job
    /// has already lost its slot; a withdrawn one still holds it.
    fn cancel_reason(&self, job: &Job) -> Error {
        let holds_slot = self.inner.sessions.live_job(&job.owner).as_ref() == Some(&job.id);
        if self.inner.shutdown.is_cancelled() || holds_slot {
            Error::Cancelled
        } else {
            Error::Superseded
        }
    }

    fn transition(&self, job: &mut Job, next: JobState) -> ms_core::Result<()> {
        job.advance(next)?;
        self.inner.sessions.set_state(&job.owner, &job.id, next);
        tracing::info!(job_id = %job.id, state = %next, "Job state changed");
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("root", &self.inner.storage.root())
            .field("dispatcher", &self.inner.dispatcher)
            .field("live_jobs", &self.inner.sessions.len())
            .finish()
    }
}
