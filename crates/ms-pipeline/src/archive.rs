//! Input kind detection and archive expansion.
//!
//! Archives are expanded in two passes: every entry is validated first
//! (readable, enclosed in the target directory, within the size limit), and
//! only then are files written. A bundle that fails validation therefore
//! leaves nothing behind.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;

use ms_core::{Error, InputKind, MediaKind};

use crate::job::InputFileRecord;

/// Extensions treated as audio input.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "m4a"];
/// Extensions treated as video input.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov"];

const ZIP_MIME_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip",
    "application/x-zip-compressed",
];

/// Classified contents of an expanded archive.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Audio and video files, in sorted path order.
    pub inputs: Vec<InputFileRecord>,
    /// Everything else.
    pub ignored: Vec<InputFileRecord>,
}

impl Expansion {
    pub fn has_audio(&self) -> bool {
        self.inputs.iter().any(|i| i.media_kind == MediaKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.inputs.iter().any(|i| i.media_kind == MediaKind::Video)
    }

    pub fn is_mixed(&self) -> bool {
        self.has_audio() && self.has_video()
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Classify a file by extension against the audio/video allow-lists.
pub fn classify_extension(path: &Path) -> MediaKind {
    match lowercase_extension(path).as_deref() {
        Some(ext) if AUDIO_EXTENSIONS.contains(&ext) => MediaKind::Audio,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => MediaKind::Video,
        _ => MediaKind::Ignored,
    }
}

/// Decide what a submission is from its declared name and MIME type.
///
/// A zip extension or zip MIME type wins; otherwise an `audio/*` or `video/*`
/// MIME type decides, and the extension allow-lists are the last resort.
pub fn detect_input_kind(declared_name: &str, declared_mime: Option<&str>) -> InputKind {
    let path = Path::new(declared_name);
    let mime = declared_mime.map(|m| m.trim().to_ascii_lowercase());

    if lowercase_extension(path).as_deref() == Some("zip")
        || mime.as_deref().is_some_and(|m| ZIP_MIME_TYPES.contains(&m))
    {
        return InputKind::Archive;
    }

    match mime.as_deref() {
        Some(m) if m.starts_with("audio/") => return InputKind::SingleAudio,
        Some(m) if m.starts_with("video/") => return InputKind::SingleVideo,
        _ => {}
    }

    match classify_extension(path) {
        MediaKind::Audio => InputKind::SingleAudio,
        MediaKind::Video => InputKind::SingleVideo,
        MediaKind::Ignored => InputKind::Unsupported,
    }
}

fn corrupt(e: impl std::fmt::Display) -> Error {
    Error::CorruptArchive(e.to_string())
}

/// A validated archive entry.
struct Entry {
    index: usize,
    relative: PathBuf,
    is_dir: bool,
}

/// Expand the zip at `archive_path` into `target_dir` and classify its files.
///
/// # Errors
///
/// - [`Error::CorruptArchive`] if the archive cannot be read, an entry would
///   land outside `target_dir`, the same file appears twice, or the contents
///   exceed `max_bytes`.
/// - [`Error::Io`] if writing into `target_dir` fails.
pub fn expand(archive_path: &Path, target_dir: &Path, max_bytes: u64) -> ms_core::Result<Expansion> {
    let file = File::open(archive_path).map_err(|e| corrupt(format!("cannot open archive: {e}")))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(corrupt)?;

    let entries = validate_entries(&mut archive, max_bytes)?;
    extract_entries(&mut archive, &entries, target_dir, max_bytes)?;

    let expansion = classify_tree(target_dir);
    tracing::info!(
        "Expanded {} entries from {}: {} media, {} ignored",
        entries.len(),
        archive_path.display(),
        expansion.inputs.len(),
        expansion.ignored.len()
    );
    Ok(expansion)
}

fn validate_entries<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    max_bytes: u64,
) -> ms_core::Result<Vec<Entry>> {
    let mut entries = Vec::with_capacity(archive.len());
    let mut declared: u64 = 0;

    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(corrupt)?;
        let relative = entry
            .enclosed_name()
            .and_then(|p| confined_path(&p))
            .ok_or_else(|| {
                corrupt(format!(
                    "entry '{}' would be written outside the extraction directory",
                    entry.name()
                ))
            })?;

        declared = declared.saturating_add(entry.size());
        if declared > max_bytes {
            return Err(corrupt(format!(
                "archive expands to more than {max_bytes} bytes"
            )));
        }

        entries.push(Entry {
            index,
            relative,
            is_dir: entry.is_dir(),
        });
    }

    Ok(entries)
}

/// Keep the normal components of an entry path, dropping `.`. Any root,
/// prefix or `..` component rejects the whole path, as does an empty result.
fn confined_path(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

fn extract_entries<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    entries: &[Entry],
    target_dir: &Path,
    max_bytes: u64,
) -> ms_core::Result<()> {
    let mut written: u64 = 0;

    for e in entries {
        let dest = target_dir.join(&e.relative);
        let dir = if e.is_dir { Some(dest.as_path()) } else { dest.parent() };
        if let Some(dir) = dir {
            // Fails when an earlier file entry already took a directory's name.
            std::fs::create_dir_all(dir).map_err(|err| {
                corrupt(format!(
                    "entry '{}' conflicts with another entry: {err}",
                    e.relative.display()
                ))
            })?;
        }
        if e.is_dir {
            continue;
        }

        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    corrupt(format!("duplicate entry '{}'", e.relative.display()))
                }
                _ => Error::from(err),
            })?;

        let mut entry = archive.by_index(e.index).map_err(corrupt)?;
        let remaining = max_bytes - written;
        // Declared sizes can lie; cap the actual bytes as well.
        let copied = std::io::copy(&mut (&mut entry).take(remaining + 1), &mut out)
            .map_err(|err| corrupt(format!("failed to read '{}': {err}", e.relative.display())))?;
        if copied > remaining {
            return Err(corrupt(format!(
                "archive expands to more than {max_bytes} bytes"
            )));
        }
        written += copied;
    }

    Ok(())
}

/// macOS archive junk that carries media extensions but no media.
fn is_resource_fork(relative: &Path) -> bool {
    relative.components().any(|c| c.as_os_str() == "__MACOSX")
        || relative
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("._"))
}

/// Walk `root` in sorted order and classify every regular file.
pub fn classify_tree(root: &Path) -> Expansion {
    let mut expansion = Expansion::default();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Error walking extracted archive");
                None
            }
        })
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let media_kind = if is_resource_fork(relative) {
            MediaKind::Ignored
        } else {
            classify_extension(path)
        };

        let record = InputFileRecord {
            path: path.to_path_buf(),
            media_kind,
            original_name: relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        };

        if media_kind.is_media() {
            expansion.inputs.push(record);
        } else {
            tracing::debug!("Ignoring archive member {}", record.original_name);
            expansion.ignored.push(record);
        }
    }

    expansion
}
