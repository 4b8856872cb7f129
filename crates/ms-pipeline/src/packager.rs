//! Turn a job's successful outputs into one deliverable.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use ms_core::{Error, JobId};

use crate::job::{InputOutcome, Outcome};

/// Shape of a deliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableKind {
    /// The encoded file itself.
    Single,
    /// A zip bundling several encoded files.
    Archive,
}

/// What is handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deliverable {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: DeliverableKind,
    /// Number of encoded files inside.
    pub artifact_count: usize,
}

/// Name of the bundle for a job.
pub fn archive_name(job_id: &JobId) -> String {
    format!("compressed_{job_id}.zip")
}

/// Build the deliverable from dispatch outcomes.
///
/// One success is delivered as-is; several are bundled into a stored zip
/// under `package_dir`. The zip is written under a hidden `.partial` name and
/// renamed once complete, so a failed write never leaves a bundle that looks
/// finished.
///
/// # Errors
///
/// - [`Error::AllEncodesFailed`] if no outcome succeeded.
/// - [`Error::Packaging`] if the bundle cannot be written.
pub async fn package(
    job_id: &JobId,
    outcomes: &[InputOutcome],
    package_dir: &Path,
) -> ms_core::Result<Deliverable> {
    let outputs: Vec<PathBuf> = outcomes
        .iter()
        .filter_map(|o| o.output().cloned())
        .collect();

    match outputs.len() {
        0 => Err(Error::AllEncodesFailed {
            count: outcomes.len(),
            detail: failure_detail(outcomes),
        }),
        1 => {
            let path = outputs.into_iter().next().unwrap_or_default();
            let file_name = file_name_of(&path)?;
            tracing::debug!(job_id = %job_id, "Delivering single file {file_name}");
            Ok(Deliverable {
                path,
                file_name,
                kind: DeliverableKind::Single,
                artifact_count: 1,
            })
        }
        count => {
            let file_name = archive_name(job_id);
            let final_path = package_dir.join(&file_name);
            let partial = package_dir.join(format!(".{file_name}.partial"));

            let (p, f) = (partial.clone(), final_path.clone());
            let written = tokio::task::spawn_blocking(move || write_bundle(&outputs, &p, &f))
                .await
                .map_err(|e| Error::Packaging(format!("packaging task failed: {e}")))?;

            if let Err(e) = written {
                let _ = std::fs::remove_file(&partial);
                return Err(e);
            }

            tracing::info!(job_id = %job_id, "Bundled {count} outputs into {file_name}");
            Ok(Deliverable {
                path: final_path,
                file_name,
                kind: DeliverableKind::Archive,
                artifact_count: count,
            })
        }
    }
}

fn file_name_of(path: &Path) -> ms_core::Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Packaging(format!("output has no file name: {}", path.display())))
}

fn write_bundle(outputs: &[PathBuf], partial: &Path, final_path: &Path) -> ms_core::Result<()> {
    let file = File::create(partial).map_err(pack_err)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    // Encoded media does not compress further.
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for output in outputs {
        let name = file_name_of(output)?;
        zip.start_file(name.as_str(), options).map_err(pack_err)?;
        let mut src = BufReader::new(File::open(output).map_err(pack_err)?);
        std::io::copy(&mut src, &mut zip).map_err(pack_err)?;
    }

    let mut writer = zip.finish().map_err(pack_err)?;
    std::io::Write::flush(&mut writer).map_err(pack_err)?;
    drop(writer);

    std::fs::rename(partial, final_path).map_err(pack_err)?;
    Ok(())
}

fn pack_err(e: impl std::fmt::Display) -> Error {
    Error::Packaging(e.to_string())
}

fn failure_detail(outcomes: &[InputOutcome]) -> String {
    if outcomes.is_empty() {
        return "no inputs".to_string();
    }
    outcomes
        .iter()
        .map(|o| match &o.outcome {
            Outcome::Failed { reason } | Outcome::Skipped { reason } => {
                format!("{}: {reason}", o.input.original_name)
            }
            Outcome::Encoded { .. } => format!("{}: encoded", o.input.original_name),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::InputFileRecord;
    use assert_matches::assert_matches;
    use ms_core::MediaKind;
    use std::io::Read;

    fn encoded(dir: &Path, name: &str, data: &[u8]) -> InputOutcome {
        let output = dir.join(format!("compressed_{name}"));
        std::fs::write(&output, data).unwrap();
        InputOutcome {
            input: InputFileRecord {
                path: PathBuf::from(name),
                media_kind: MediaKind::Audio,
                original_name: name.to_string(),
            },
            outcome: Outcome::Encoded { output },
        }
    }

    fn failed(name: &str) -> InputOutcome {
        InputOutcome {
            input: InputFileRecord {
                path: PathBuf::from(name),
                media_kind: MediaKind::Audio,
                original_name: name.to_string(),
            },
            outcome: Outcome::Failed {
                reason: "exit 1".into(),
            },
        }
    }

    fn dirs() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("output");
        let pkg = tmp.path().join("package");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::create_dir_all(&pkg).unwrap();
        (tmp, out, pkg)
    }

    #[tokio::test]
    async fn single_success_is_delivered_directly() {
        let (_tmp, out, pkg) = dirs();
        let outcomes = vec![encoded(&out, "a.mp3", b"aaa"), failed("b.mp3")];

        let d = package(&JobId::from("job-1"), &outcomes, &pkg).await.unwrap();
        assert_eq!(d.kind, DeliverableKind::Single);
        assert_eq!(d.artifact_count, 1);
        assert_eq!(d.file_name, "compressed_a.mp3");
        assert_eq!(d.path, out.join("compressed_a.mp3"));
        assert_eq!(std::fs::read_dir(&pkg).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn several_successes_are_bundled() {
        let (_tmp, out, pkg) = dirs();
        let outcomes = vec![
            encoded(&out, "a.mp3", b"aaa"),
            failed("x.mp3"),
            encoded(&out, "b.mp3", b"bbbb"),
        ];

        let d = package(&JobId::from("job-2"), &outcomes, &pkg).await.unwrap();
        assert_eq!(d.kind, DeliverableKind::Archive);
        assert_eq!(d.artifact_count, 2);
        assert_eq!(d.file_name, "compressed_job-2.zip");
        assert_eq!(d.path, pkg.join("compressed_job-2.zip"));
        assert!(!pkg.join(".compressed_job-2.zip.partial").exists());

        let mut zip = zip::ZipArchive::new(File::open(&d.path).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        let mut contents = String::new();
        zip.by_name("compressed_b.mp3")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "bbbb");
        assert_eq!(
            zip.by_name("compressed_a.mp3").unwrap().compression(),
            CompressionMethod::Stored
        );
    }

    #[tokio::test]
    async fn no_success_is_an_error() {
        let (_tmp, _out, pkg) = dirs();
        let outcomes = vec![failed("a.mp3"), failed("b.mp3")];

        let err = package(&JobId::from("job-3"), &outcomes, &pkg).await.unwrap_err();
        assert_matches!(err, Error::AllEncodesFailed { count: 2, .. });
        assert!(err.to_string().contains("a.mp3: exit 1"));
    }

    #[tokio::test]
    async fn missing_output_removes_partial() {
        let (_tmp, out, pkg) = dirs();
        let a = encoded(&out, "a.mp3", b"aaa");
        let b = encoded(&out, "b.mp3", b"bbb");
        std::fs::remove_file(b.output().unwrap()).unwrap();

        let err = package(&JobId::from("job-4"), &[a, b], &pkg).await.unwrap_err();
        assert_matches!(err, Error::Packaging(_));
        assert_eq!(std::fs::read_dir(&pkg).unwrap().count(), 0);
    }
}
