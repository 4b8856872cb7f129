//! Per-input encoder dispatch.
//!
//! All jobs share one [`Dispatcher`], so its semaphore bounds the number of
//! encoder processes running across the whole service. Every input runs in
//! its own task; a failure, timeout or panic affects only that input's
//! [`Outcome`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use ms_av::{sanitize_file_name, EncodeRequest, Encoder};
use ms_core::{JobId, Profile};

use crate::job::{InputFileRecord, InputOutcome, Outcome};

/// Runs the encoder over a job's inputs under a global concurrency bound.
#[derive(Clone)]
pub struct Dispatcher {
    encoder: Arc<dyn Encoder>,
    semaphore: Arc<Semaphore>,
    workers: usize,
    timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("encoder", &self.encoder.name())
            .field("workers", &self.workers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dispatcher {
    /// `workers` is clamped to at least one.
    pub fn new(encoder: Arc<dyn Encoder>, workers: usize, timeout: Duration) -> Self {
        let workers = workers.max(1);
        Self {
            encoder,
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
            timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Encode every input with `profile`, writing into `output_dir`.
    ///
    /// The returned outcomes line up index for index with `inputs`. Inputs
    /// whose media kind differs from the profile's are skipped without
    /// running the encoder.
    pub async fn dispatch(
        &self,
        job_id: &JobId,
        inputs: &[InputFileRecord],
        profile: Profile,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Vec<InputOutcome> {
        let names = output_names(inputs, profile);
        let mut handles = Vec::with_capacity(inputs.len());

        for (input, name) in inputs.iter().zip(names) {
            if input.media_kind != profile.kind() {
                handles.push(None);
                continue;
            }

            let request = EncodeRequest {
                input: input.path.clone(),
                output: output_dir.join(name),
                profile,
                timeout: self.timeout,
            };
            let encoder = self.encoder.clone();
            let semaphore = self.semaphore.clone();
            let cancel = cancel.clone();
            let job_id = job_id.clone();
            let original = input.original_name.clone();

            handles.push(Some(tokio::spawn(async move {
                let outcome = encode_one(encoder, semaphore, request, cancel).await;
                match &outcome {
                    Outcome::Encoded { output } => {
                        tracing::debug!(job_id = %job_id, "Encoded {original} -> {}", output.display());
                    }
                    Outcome::Failed { reason } => {
                        tracing::warn!(job_id = %job_id, "Encoding {original} failed: {reason}");
                    }
                    Outcome::Skipped { .. } => {}
                }
                outcome
            })));
        }

        let mut outcomes = Vec::with_capacity(inputs.len());
        for (input, handle) in inputs.iter().zip(handles) {
            let outcome = match handle {
                None => Outcome::Skipped {
                    reason: format!("{} input, {} profile chosen", input.media_kind, profile.kind()),
                },
                Some(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Outcome::Failed {
                        reason: format!("encoder task failed: {e}"),
                    },
                },
            };
            outcomes.push(InputOutcome {
                input: input.clone(),
                outcome,
            });
        }

        let ok = outcomes.iter().filter(|o| o.is_success()).count();
        tracing::info!(
            job_id = %job_id,
            profile = %profile,
            "Dispatched {} inputs: {} encoded",
            outcomes.len(),
            ok
        );
        outcomes
    }
}

async fn encode_one(
    encoder: Arc<dyn Encoder>,
    semaphore: Arc<Semaphore>,
    request: EncodeRequest,
    cancel: CancellationToken,
) -> Outcome {
    let _permit = tokio::select! {
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Outcome::Failed { reason: "worker pool closed".into() },
        },
        _ = cancel.cancelled() => return Outcome::Failed { reason: "cancelled".into() },
    };

    let result = tokio::select! {
        r = tokio::time::timeout(request.timeout, encoder.encode(&request)) => r,
        _ = cancel.cancelled() => {
            remove_partial(&request.output).await;
            return Outcome::Failed { reason: "cancelled".into() };
        }
    };

    let failure = match result {
        Err(_) => format!("timed out after {}s", request.timeout.as_secs()),
        Ok(Err(e)) => e.to_string(),
        Ok(Ok(())) => match tokio::fs::metadata(&request.output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                return Outcome::Encoded {
                    output: request.output,
                };
            }
            Ok(_) => "encoder produced an empty output".to_string(),
            Err(_) => "encoder produced no output".to_string(),
        },
    };

    remove_partial(&request.output).await;
    Outcome::Failed { reason: failure }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove partial output {}: {e}", path.display());
        }
    }
}

/// Output file names for `inputs`: `compressed_<stem>.<ext>`, with `_<n>`
/// appended to later duplicates.
pub fn output_names(inputs: &[InputFileRecord], profile: Profile) -> Vec<PathBuf> {
    let ext = profile.extension();
    let mut taken = HashSet::new();

    inputs
        .iter()
        .map(|input| {
            let stem = input
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(sanitize_file_name)
                .unwrap_or_else(|| "input".to_string());

            let mut candidate = format!("compressed_{stem}.{ext}");
            let mut n = 2;
            while !taken.insert(candidate.to_lowercase()) {
                candidate = format!("compressed_{stem}_{n}.{ext}");
                n += 1;
            }
            PathBuf::from(candidate)
        })
        .collect()
}
