//! Pipeline configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! storage, session, encoder, transport and archive sections. Every section defaults
//! sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub encoder: EncoderConfig,
    pub transport: TransportConfig,
    pub archive: ArchiveConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.encoder.workers == 0 {
            warnings.push("encoder.workers is 0; one worker will be used".into());
        }
        if self.encoder.timeout_secs == 0 {
            warnings.push("encoder.timeout_secs is 0; every encode will time out".into());
        }
        if self.transport.timeout_secs == 0 {
            warnings.push("transport.timeout_secs is 0; every fetch will time out".into());
        }
        if self.session.selection_timeout_secs == 0 {
            warnings.push(
                "session.selection_timeout_secs is 0; jobs expire before a profile can be chosen"
                    .into(),
            );
        }
        if self.storage.max_input_bytes == 0 {
            warnings.push("storage.max_input_bytes is 0; every submission is rejected".into());
        }
        if self.storage.max_extracted_bytes < self.storage.max_input_bytes {
            warnings.push(
                "storage.max_extracted_bytes is smaller than storage.max_input_bytes".into(),
            );
        }
        if let Some(ref ffmpeg) = self.encoder.ffmpeg_path {
            if !ffmpeg.exists() {
                warnings.push(format!(
                    "encoder.ffmpeg_path {} does not exist; PATH lookup will be used",
                    ffmpeg.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Scratch storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory under which every job gets its own scratch tree.
    pub root: PathBuf,
    /// Largest submitted file accepted, in bytes.
    pub max_input_bytes: u64,
    /// Largest total size an archive may expand to, in bytes.
    pub max_extracted_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("mediasqueeze"),
            max_input_bytes: 100 * 1024 * 1024,
            max_extracted_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// What happens when an owner submits while a job of theirs is still live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The new submission is refused.
    #[default]
    Reject,
    /// The pending job is cancelled and the new one takes its place.
    Supersede,
}

/// Profile selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub selection_timeout_secs: u64,
    pub conflict_policy: ConflictPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            selection_timeout_secs: 120,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.selection_timeout_secs)
    }
}

/// External encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit ffmpeg binary; `PATH` is searched when unset or missing.
    pub ffmpeg_path: Option<PathBuf>,
    /// Maximum run time of a single encoder invocation.
    pub timeout_secs: u64,
    /// Encoder processes allowed to run at once across all jobs.
    pub workers: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            timeout_secs: 600,
            workers: 2,
        }
    }
}

impl EncoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bounds on calls into the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum time for one fetch, profile request or delivery hand-over.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How an archive holding both audio and video is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixedArchivePolicy {
    /// Offer every profile; inputs of the other kind are reported as skipped.
    #[default]
    SelectedKindOnly,
    /// Fail the job as unsupported input.
    Reject,
}

/// Archive handling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub mixed_policy: MixedArchivePolicy,
}
