//! Per-job scratch storage.
//!
//! [`ScratchStorage`] allocates one exclusive directory tree per job under a
//! configured root and removes it again on release. Every file a job creates
//! lives inside its [`ScratchDir`], which makes the tree the single unit of
//! cleanup.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ms_core::{Error, JobId};

/// Subdirectory receiving the fetched submission.
pub const INPUT_DIR: &str = "input";
/// Subdirectory receiving archive contents.
pub const EXTRACT_DIR: &str = "extract";
/// Subdirectory receiving encoder outputs.
pub const OUTPUT_DIR: &str = "output";
/// Subdirectory receiving the packaged deliverable.
pub const PACKAGE_DIR: &str = "package";

const SUBDIRS: [&str; 4] = [INPUT_DIR, EXTRACT_DIR, OUTPUT_DIR, PACKAGE_DIR];

/// Allocator for per-job scratch trees.
#[derive(Debug, Clone)]
pub struct ScratchStorage {
    root: PathBuf,
}

impl ScratchStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the job's tree lives at, whether or not it exists.
    pub fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.root.join(job_id.as_str())
    }

    /// Create the job's scratch tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the tree already exists or the root is
    /// not writable. A partially created tree is removed before returning.
    pub fn allocate(&self, job_id: &JobId) -> ms_core::Result<ScratchDir> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| Error::storage(&self.root, format!("failed to create root: {e}")))?;

        let path = self.path_for(job_id);
        std::fs::create_dir(&path).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::storage(&path, "scratch directory already exists"),
            _ => Error::storage(&path, format!("failed to create scratch directory: {e}")),
        })?;

        for sub in SUBDIRS {
            if let Err(e) = std::fs::create_dir(path.join(sub)) {
                let _ = std::fs::remove_dir_all(&path);
                return Err(Error::storage(
                    path.join(sub),
                    format!("failed to create subdirectory: {e}"),
                ));
            }
        }

        tracing::debug!(job_id = %job_id, "Allocated scratch at {}", path.display());
        Ok(ScratchDir { path })
    }

    /// Remove the job's scratch tree. Missing trees are not an error.
    pub fn release(&self, job_id: &JobId) -> ms_core::Result<()> {
        let path = self.path_for(job_id);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "Released scratch at {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(&path, format!("failed to remove: {e}"))),
        }
    }
}

/// Handle to one job's scratch tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_dir(&self) -> PathBuf {
        self.path.join(INPUT_DIR)
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.path.join(EXTRACT_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR)
    }

    pub fn package_dir(&self) -> PathBuf {
        self.path.join(PACKAGE_DIR)
    }

    /// Path for `name` inside the given subdirectory. The name is sanitized
    /// first, so the result never leaves the tree.
    pub fn file_in(&self, subdir: &str, name: &str) -> PathBuf {
        self.path.join(subdir).join(sanitize_file_name(name))
    }

    /// Whether `candidate` lies inside this tree (lexically).
    pub fn contains(&self, candidate: &Path) -> bool {
        candidate.starts_with(&self.path)
            && !candidate
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }
}

/// Reduce a user-supplied name to a single safe path component.
///
/// Directory parts are dropped, control and reserved characters are replaced
/// with `_`, and leading dots are stripped so the result is never `..` or a
/// hidden file. An empty result becomes `"input"`.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        "input".to_string()
    } else {
        cleaned.chars().take(200).collect()
    }
}
