//! Live-job tracking per owner session.
//!
//! Every owner has at most one live job. The store holds that job's state,
//! the profiles it was offered, the one-shot sender its task is waiting on,
//! and the cancellation token used to supersede it. All checks that decide
//! whether a selection is accepted happen under the map's entry lock, so a
//! choice and an expiry can never both win.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use ms_core::config::ConflictPolicy;
use ms_core::{Error, JobId, OwnerSession, Profile};

use crate::job::JobState;

/// Slot held by an owner's live job.
#[derive(Debug)]
struct SessionEntry {
    job_id: JobId,
    state: JobState,
    offered: Vec<Profile>,
    selection: Option<oneshot::Sender<Profile>>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

impl SessionEntry {
    fn new(job_id: JobId, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            state: JobState::Created,
            offered: Vec::new(),
            selection: None,
            cancel,
            started_at: Utc::now(),
        }
    }

    /// Whether a newer submission may take this slot.
    fn is_supersedable(&self) -> bool {
        matches!(
            self.state,
            JobState::Created | JobState::AwaitingInput | JobState::AwaitingProfile
        )
    }
}

/// Thread-safe registry of live jobs keyed by owner.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<OwnerSession, SessionEntry>>,
    policy: ConflictPolicy,
}

impl SessionStore {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            policy,
        }
    }

    /// Make `job_id` the owner's live job.
    ///
    /// Returns the job's cancellation token, a child of `parent`. Under
    /// [`ConflictPolicy::Supersede`] a live job that has not started
    /// transcoding is cancelled and replaced; otherwise an existing live job
    /// makes this fail with [`Error::SessionBusy`].
    pub fn claim(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        parent: &CancellationToken,
    ) -> ms_core::Result<CancellationToken> {
        let token = parent.child_token();

        match self.sessions.entry(owner.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry::new(job_id.clone(), token.clone()));
            }
            Entry::Occupied(mut slot) => {
                if self.policy != ConflictPolicy::Supersede || !slot.get().is_supersedable() {
                    return Err(Error::SessionBusy {
                        owner: owner.to_string(),
                    });
                }
                let previous = slot.insert(SessionEntry::new(job_id.clone(), token.clone()));
                previous.cancel.cancel();
                tracing::info!(
                    owner = %owner,
                    job_id = %job_id,
                    superseded = %previous.job_id,
                    "Superseded pending job ({})",
                    previous.state
                );
            }
        }

        Ok(token)
    }

    /// Record the state of the owner's live job. Ignored if `job_id` is no
    /// longer the live job.
    pub fn set_state(&self, owner: &OwnerSession, job_id: &JobId, state: JobState) {
        if let Some(mut entry) = self.sessions.get_mut(owner) {
            if entry.job_id == *job_id {
                entry.state = state;
            }
        }
    }

    /// Move the live job to AwaitingProfile and return the receiver its task
    /// waits on.
    pub fn await_selection(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        offered: Vec<Profile>,
    ) -> ms_core::Result<oneshot::Receiver<Profile>> {
        let mut entry = self
            .sessions
            .get_mut(owner)
            .filter(|e| e.job_id == *job_id)
            .ok_or(Error::Superseded)?;

        let (tx, rx) = oneshot::channel();
        entry.offered = offered;
        entry.selection = Some(tx);
        entry.state = JobState::AwaitingProfile;
        Ok(rx)
    }

    /// Accept a profile choice for the owner's live job.
    ///
    /// Nothing is mutated when the choice is rejected.
    ///
    /// # Errors
    ///
    /// - [`Error::StaleSelection`] if the owner has no live job, the live job
    ///   is a different one, it is not awaiting a profile, or its choice was
    ///   already made.
    /// - [`Error::InvalidProfile`] if `profile_id` is unknown or was not
    ///   offered for this job.
    pub fn choose(
        &self,
        owner: &OwnerSession,
        job_id: &JobId,
        profile_id: &str,
    ) -> ms_core::Result<Profile> {
        let mut entry = self
            .sessions
            .get_mut(owner)
            .ok_or_else(|| Error::stale(job_id, "no live job for this session"))?;

        if entry.job_id != *job_id {
            return Err(Error::stale(job_id, "job is no longer the session's live job"));
        }
        if entry.state != JobState::AwaitingProfile {
            return Err(Error::stale(
                job_id,
                format!("job is {}, not awaiting a profile", entry.state),
            ));
        }
        match &entry.selection {
            Some(tx) if !tx.is_closed() => {}
            _ => return Err(Error::stale(job_id, "job is no longer waiting for a choice")),
        }

        let profile: Profile = profile_id.parse()?;
        if !entry.offered.contains(&profile) {
            return Err(Error::InvalidProfile(format!(
                "{profile} was not offered for job {job_id}"
            )));
        }

        let Some(tx) = entry.selection.take() else {
            return Err(Error::stale(job_id, "job is no longer waiting for a choice"));
        };
        if tx.send(profile).is_err() {
            return Err(Error::stale(job_id, "job is no longer waiting for a choice"));
        }
        entry.state = JobState::Transcoding;

        tracing::info!(owner = %owner, job_id = %job_id, profile = %profile, "Profile chosen");
        Ok(profile)
    }

    /// Expire the live job if it is still awaiting a profile.
    ///
    /// Returns false if a choice got there first or the job is gone.
    pub fn expire(&self, owner: &OwnerSession, job_id: &JobId) -> bool {
        let Some(mut entry) = self.sessions.get_mut(owner) else {
            return false;
        };
        if entry.job_id != *job_id
            || entry.state != JobState::AwaitingProfile
            || entry.selection.is_none()
        {
            return false;
        }

        entry.selection = None;
        entry.state = JobState::Expired;
        true
    }

    /// Cancel the owner's live job if it is `job_id`. The job keeps its slot
    /// until it has cleaned up.
    pub fn withdraw(&self, owner: &OwnerSession, job_id: &JobId) -> bool {
        match self.sessions.get(owner) {
            Some(entry) if entry.job_id == *job_id => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// State of `job_id` while it is some owner's live job.
    pub fn state_of(&self, job_id: &JobId) -> Option<JobState> {
        self.sessions
            .iter()
            .find(|e| e.value().job_id == *job_id)
            .map(|e| e.value().state)
    }

    /// The owner's live job, if any.
    pub fn live_job(&self, owner: &OwnerSession) -> Option<JobId> {
        self.sessions.get(owner).map(|e| e.job_id.clone())
    }

    /// Free the owner's slot if `job_id` still holds it.
    pub fn release(&self, owner: &OwnerSession, job_id: &JobId) {
        if let Some((_, entry)) = self.sessions.remove_if(owner, |_, e| e.job_id == *job_id) {
            tracing::debug!(
                owner = %owner,
                job_id = %job_id,
                duration_secs = (Utc::now() - entry.started_at).num_seconds(),
                "Released session slot"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}
