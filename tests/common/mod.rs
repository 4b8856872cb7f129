//! Shared test harness for integration tests.
//!
//! Provides [`Harness`], which builds a [`Pipeline`] over a temporary scratch
//! root with a [`ScriptedEncoder`] and a [`RecordingTransport`]. Every
//! transport callback is turned into an [`Event`] so tests can drive a job
//! step by step.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;

use ms_av::{EncodeRequest, Encoder};
use ms_core::config::Config;
use ms_core::{Error, JobId, OwnerSession, Profile};
use ms_pipeline::{Deliverable, DeliverableKind, FileReference, JobReport, Pipeline, Transport};

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Encoder that fails any input whose file name contains `fail` and writes a
/// small marker file for everything else.
#[derive(Default)]
pub struct ScriptedEncoder {
    calls: Mutex<Vec<(String, Profile)>>,
}

impl ScriptedEncoder {
    /// File names encoded so far, with the profile used.
    pub fn calls(&self) -> Vec<(String, Profile)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn encode(&self, request: &EncodeRequest) -> ms_core::Result<()> {
        let name = request
            .input
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        self.calls.lock().unwrap().push((name.clone(), request.profile));

        if name.contains("fail") {
            return Err(Error::tool("scripted", "exited with status 1"));
        }
        tokio::fs::write(&request.output, format!("{}:{name}", request.profile)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A transport callback, captured for assertions.
#[derive(Debug, Clone)]
pub enum Event {
    ProfileRequested {
        owner: OwnerSession,
        job_id: JobId,
        offered: Vec<Profile>,
    },
    Delivered {
        job_id: JobId,
        file_name: String,
        kind: DeliverableKind,
        artifact_count: usize,
        /// Entry names when the deliverable is a zip.
        entries: Vec<String>,
        report: JobReport,
    },
    Failed {
        job_id: JobId,
        kind: &'static str,
        message: String,
    },
}

impl Event {
    pub fn job_id(&self) -> &JobId {
        match self {
            Event::ProfileRequested { job_id, .. }
            | Event::Delivered { job_id, .. }
            | Event::Failed { job_id, .. } => job_id,
        }
    }
}

/// Transport that fetches by copying the path in `unique_id` and records
/// everything else. Fetching a file whose name contains `stall` never
/// completes.
pub struct RecordingTransport {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn fetch(&self, file: &FileReference, dest: &Path) -> ms_core::Result<()> {
        if file.unique_id.contains("stall") {
            std::future::pending::<()>().await;
        }
        tokio::fs::copy(&file.unique_id, dest).await?;
        Ok(())
    }

    async fn request_profile(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        offered: &[Profile],
    ) -> ms_core::Result<()> {
        let _ = self.events.send(Event::ProfileRequested {
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
        // Scratch is removed once this returns; read the deliverable now.
        let entries = match deliverable.kind {
            DeliverableKind::Single => Vec::new(),
            DeliverableKind::Archive => {
                let mut zip = zip::ZipArchive::new(File::open(&deliverable.path)?)
                    .map_err(|e| Error::Delivery(e.to_string()))?;
                (0..zip.len())
                    .map(|i| zip.by_index(i).unwrap().name().to_string())
                    .collect()
            }
        };
        assert!(deliverable.path.exists());

        let _ = self.events.send(Event::Delivered {
            job_id: job_id.clone(),
            file_name: deliverable.file_name.clone(),
            kind: deliverable.kind,
            artifact_count: deliverable.artifact_count,
            entries,
            report: report.clone(),
        });
        Ok(())
    }

    async fn on_failed(&self, _owner: &OwnerSession, job_id: &JobId, reason: &Error) {
        let _ = self.events.send(Event::Failed {
            job_id: job_id.clone(),
            kind: reason.kind(),
            message: reason.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A pipeline wired to test doubles over a temporary directory.
pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub pipeline: Pipeline,
    pub encoder: Arc<ScriptedEncoder>,
    events: mpsc::UnboundedReceiver<Event>,
    pending: VecDeque<Event>,
}

impl Harness {
    /// Create a harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness, letting the caller adjust the configuration. The
    /// scratch root always points into the harness's temporary directory.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("sources")).unwrap();

        let mut config = Config::default();
        config.storage.root = tmp.path().join("scratch");
        adjust(&mut config);

        let (tx, events) = mpsc::unbounded_channel();
        let encoder = Arc::new(ScriptedEncoder::default());
        let pipeline = Pipeline::new(
            config,
            encoder.clone(),
            Arc::new(RecordingTransport { events: tx }),
        );

        Self {
            tmp,
            pipeline,
            encoder,
            events,
            pending: VecDeque::new(),
        }
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.tmp.path().join("scratch")
    }

    /// Whether no job scratch tree is left behind.
    pub fn scratch_is_empty(&self) -> bool {
        match std::fs::read_dir(self.scratch_root()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    /// Write a source file and return a reference to it.
    pub fn source(&self, name: &str, data: &[u8]) -> FileReference {
        let path = self.tmp.path().join("sources").join(name);
        std::fs::write(&path, data).unwrap();
        FileReference::new(path.to_string_lossy()).with_size(data.len() as u64)
    }

    /// Write a zip source with the given entries and return a reference to it.
    pub fn zip_source(&self, name: &str, entries: &[(&str, &[u8])]) -> FileReference {
        let path = self.tmp.path().join("sources").join(name);
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        for (entry, data) in entries {
            zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        let size = std::fs::metadata(&path).unwrap().len();
        FileReference::new(path.to_string_lossy()).with_size(size)
    }

    /// Submit a file on behalf of `owner`.
    pub fn submit(&self, owner: &str, file: FileReference, name: &str) -> ms_core::Result<JobId> {
        self.pipeline
            .submit(OwnerSession::from(owner), file, name, None)
    }

    /// Next event for `job_id`, buffering events of other jobs.
    pub async fn next_for(&mut self, job_id: &JobId) -> Event {
        if let Some(pos) = self.pending.iter().position(|e| e.job_id() == job_id) {
            return self.pending.remove(pos).unwrap();
        }
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), self.events.recv())
                .await
                .expect("timed out waiting for a pipeline event")
                .expect("event channel closed");
            if event.job_id() == job_id {
                return event;
            }
            self.pending.push_back(event);
        }
    }

    /// Wait for the profile request of `job_id` and return the offer.
    pub async fn offered(&mut self, job_id: &JobId) -> Vec<Profile> {
        match self.next_for(job_id).await {
            Event::ProfileRequested { offered, .. } => offered,
            other => panic!("expected a profile request, got {other:?}"),
        }
    }

    /// Wait until `job_id` has been fully cleaned up.
    pub async fn wait_gone(&self, job_id: &JobId) {
        for _ in 0..200 {
            if self.pipeline.job_state(job_id).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} is still live");
    }

    /// Wait until no scratch tree is left under the root.
    pub async fn wait_scratch_empty(&self) {
        for _ in 0..200 {
            if self.scratch_is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scratch root still holds job trees");
    }
}

/// Unwrap a delivered event.
pub fn delivered(event: Event) -> (String, DeliverableKind, usize, Vec<String>, JobReport) {
    match event {
        Event::Delivered {
            file_name,
            kind,
            artifact_count,
            entries,
            report,
            ..
        } => (file_name, kind, artifact_count, entries, report),
        other => panic!("expected delivery, got {other:?}"),
    }
}

/// Unwrap a failed event into its error kind and message.
pub fn failed(event: Event) -> (&'static str, String) {
    match event {
        Event::Failed { kind, message, .. } => (kind, message),
        other => panic!("expected failure, got {other:?}"),
    }
}
