//! The per-job record and its state machine.
//!
//! A [`Job`] is owned by the task driving it; every state change goes through
//! [`Job::advance`], which only accepts the transitions listed in
//! [`JobState::can_transition_to`].

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use ms_av::ScratchDir;
use ms_core::{Error, InputKind, JobId, MediaKind, OwnerSession, Profile};

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    AwaitingInput,
    AwaitingProfile,
    Transcoding,
    Packaging,
    /// Terminal: the deliverable was handed to the transport.
    Delivered,
    /// Terminal: unrecoverable error.
    Failed,
    /// Terminal: no profile was chosen in time.
    Expired,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Expired)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Created, AwaitingInput)
            | (AwaitingInput, AwaitingProfile)
            | (AwaitingProfile, Transcoding)
            | (AwaitingProfile, Expired)
            | (Transcoding, Packaging)
            | (Packaging, Delivered) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::AwaitingInput => "awaiting_input",
            Self::AwaitingProfile => "awaiting_profile",
            Self::Transcoding => "transcoding",
            Self::Packaging => "packaging",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// A classified input file. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFileRecord {
    pub path: PathBuf,
    pub media_kind: MediaKind,
    /// Name shown to the submitter: the archive-relative path, or the
    /// declared name of a single file.
    pub original_name: String,
}

/// What happened to one input during dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Encoded { output: PathBuf },
    Failed { reason: String },
    /// Not sent to the encoder because its kind does not match the profile.
    Skipped { reason: String },
}

/// An input paired with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputOutcome {
    pub input: InputFileRecord,
    pub outcome: Outcome,
}

impl InputOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Encoded { .. })
    }

    /// Path of the encoded artifact, if any.
    pub fn output(&self) -> Option<&PathBuf> {
        match &self.outcome {
            Outcome::Encoded { output } => Some(output),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One compression request, from ingestion to cleanup.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub owner: OwnerSession,
    pub input_kind: InputKind,
    pub scratch: ScratchDir,
    pub inputs: Vec<InputFileRecord>,
    pub ignored: Vec<InputFileRecord>,
    pub profile: Option<Profile>,
    pub created_at: DateTime<Utc>,
    state: JobState,
    results: Vec<InputOutcome>,
}

impl Job {
    pub fn new(id: JobId, owner: OwnerSession, input_kind: InputKind, scratch: ScratchDir) -> Self {
        Self {
            id,
            owner,
            input_kind,
            scratch,
            inputs: Vec::new(),
            ignored: Vec::new(),
            profile: None,
            created_at: Utc::now(),
            state: JobState::Created,
            results: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn results(&self) -> &[InputOutcome] {
        &self.results
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: JobState) -> ms_core::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "job {}: illegal transition {} -> {}",
                self.id, self.state, next
            )));
        }
        tracing::debug!(job_id = %self.id, "{} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Record the dispatcher's outcomes; they must line up with `inputs`.
    pub fn set_results(&mut self, results: Vec<InputOutcome>) -> ms_core::Result<()> {
        if results.len() != self.inputs.len() {
            return Err(Error::Internal(format!(
                "job {}: {} results for {} inputs",
                self.id,
                results.len(),
                self.inputs.len()
            )));
        }
        self.results = results;
        Ok(())
    }

    /// Whether at least one input was encoded.
    pub fn has_success(&self) -> bool {
        self.results.iter().any(InputOutcome::is_success)
    }

    pub fn report(&self) -> JobReport {
        JobReport {
            job_id: self.id.clone(),
            profile: self.profile,
            outcomes: self.results.clone(),
            ignored: self.ignored.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobReport
// ---------------------------------------------------------------------------

/// Per-input account of a finished job, delivered alongside the deliverable.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub profile: Option<Profile>,
    pub outcomes: Vec<InputOutcome>,
    /// Archive members that were not media and never reached the encoder.
    pub ignored: Vec<InputFileRecord>,
}

impl JobReport {
    pub fn successes(&self) -> impl Iterator<Item = &InputOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Inputs that produced no artifact, failed or skipped.
    pub fn failures(&self) -> impl Iterator<Item = &InputOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// One line per input that did not make it into the deliverable.
    pub fn failure_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.outcome {
                Outcome::Failed { reason } => {
                    Some(format!("failed: {} ({reason})", o.input.original_name))
                }
                Outcome::Skipped { reason } => {
                    Some(format!("skipped: {} ({reason})", o.input.original_name))
                }
                Outcome::Encoded { .. } => None,
            })
            .collect();
        lines.extend(
            self.ignored
                .iter()
                .map(|i| format!("ignored: {} (not an audio or video file)", i.original_name)),
        );
        lines
    }

    /// Human-readable summary for the submitter.
    pub fn summary(&self) -> String {
        let ok = self.successes().count();
        let total = self.outcomes.len();
        let mut out = match self.profile {
            Some(p) => format!("{ok} of {total} inputs compressed with {p}."),
            None => format!("{ok} of {total} inputs compressed."),
        };
        for line in self.failure_lines() {
            out.push('\n');
            out.push_str(&line);
        }
        out
    }
}
