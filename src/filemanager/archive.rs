//! Archive codecs backing `mass(archive)` and `unarchive` (spec §4.8).
//!
//! Extraction mirrors the flatten-then-sanitize shape used for disk-image
//! export elsewhere in this codebase's ancestry: unpack into a scratch view,
//! then re-home every entry against the sandbox root, rejecting anything
//! that would land outside it.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::AgentError;
use crate::filemanager::{ensure_within, write_file_bytes};

pub fn base_name(archive_path: &Path) -> String {
    let file_name = archive_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    for suffix in [".tar.gz", ".tgz", ".zip", ".rar"] {
        if let Some(stripped) = file_name.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    file_name
}

/// Builds a zip archive at `archive_path` containing each `(host_path,
/// virtual_path)` member. Directory members are walked recursively.
pub fn create_zip(_root: &Path, archive_path: &Path, members: &[(PathBuf, String)]) -> Result<(), AgentError> {
    let file = std::fs::File::create(archive_path).map_err(|e| AgentError::RuntimeFailed(format!("creating archive: {e}")))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (host_path, virtual_path) in members {
        let entry_root = virtual_path.trim_start_matches('/');
        if host_path.is_dir() {
            for entry in walkdir::WalkDir::new(host_path).into_iter().filter_map(Result::ok) {
                let rel = entry.path().strip_prefix(host_path).unwrap_or(entry.path());
                let name = if rel.as_os_str().is_empty() {
                    format!("{entry_root}/")
                } else {
                    format!("{entry_root}/{}", rel.to_string_lossy().replace('\\', "/"))
                };
                if entry.file_type().is_dir() {
                    writer
                        .add_directory(format!("{name}/"), options)
                        .map_err(|e| AgentError::RuntimeFailed(format!("archiving {name}: {e}")))?;
                } else {
                    let bytes = std::fs::read(entry.path()).map_err(|e| AgentError::RuntimeFailed(format!("reading {name}: {e}")))?;
                    writer
                        .start_file(&name, options)
                        .map_err(|e| AgentError::RuntimeFailed(format!("archiving {name}: {e}")))?;
                    writer
                        .write_all(&bytes)
                        .map_err(|e| AgentError::RuntimeFailed(format!("writing {name}: {e}")))?;
                }
            }
        } else {
            let bytes = std::fs::read(host_path).map_err(|e| AgentError::RuntimeFailed(format!("reading {entry_root}: {e}")))?;
            writer
                .start_file(entry_root, options)
                .map_err(|e| AgentError::RuntimeFailed(format!("archiving {entry_root}: {e}")))?;
            writer
                .write_all(&bytes)
                .map_err(|e| AgentError::RuntimeFailed(format!("writing {entry_root}: {e}")))?;
        }
    }

    writer.finish().map_err(|e| AgentError::RuntimeFailed(format!("finalizing archive: {e}")))?;
    Ok(())
}

pub struct ExtractOutcome {
    pub flattened: bool,
    pub entries: Vec<String>,
}

enum Kind {
    Zip,
    TarGz,
    Rar,
}

fn detect_kind(archive_path: &Path) -> Result<Kind, AgentError> {
    let name = archive_path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
    if name.ends_with(".zip") {
        Ok(Kind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Ok(Kind::TarGz)
    } else if name.ends_with(".rar") {
        Ok(Kind::Rar)
    } else {
        Err(AgentError::InputInvalid(format!("unsupported archive type: {name}")))
    }
}

/// Extracts `archive_path` into `dest`, sanitizing every entry against
/// `root`. `base` is the archive's derived base name, used by the flatten
/// heuristic when `explicit_destination` is true.
pub fn extract(archive_path: &Path, dest: &Path, root: &Path, base: &str, explicit_destination: bool) -> Result<ExtractOutcome, AgentError> {
    let raw_entries = match detect_kind(archive_path)? {
        Kind::Zip => read_zip(archive_path)?,
        Kind::TarGz => read_tar_gz(archive_path)?,
        Kind::Rar => read_rar(archive_path)?,
    };

    let flattened = explicit_destination && should_flatten(&raw_entries, base);

    let mut written = Vec::with_capacity(raw_entries.len());
    for (name, bytes) in raw_entries {
        let relative = if flattened {
            match name.strip_prefix(&format!("{base}/")) {
                Some(rest) => rest.to_string(),
                None if name == base => continue,
                None => name.clone(),
            }
        } else {
            name.clone()
        };
        if relative.is_empty() {
            continue;
        }

        let sanitized = ensure_within(dest, Path::new(&relative))?;
        write_file_bytes(&sanitized, &bytes)?;
        written.push(virtualize_against(root, &sanitized));
    }

    Ok(ExtractOutcome { flattened, entries: written })
}

fn virtualize_against(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => format!("/{}", rel.to_string_lossy().replace('\\', "/")),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// True iff every entry is the single top-level directory `base` or lies
/// within `base/` (spec §4.8's flatten heuristic).
fn should_flatten(entries: &[(String, Vec<u8>)], base: &str) -> bool {
    !entries.is_empty()
        && entries
            .iter()
            .all(|(name, _)| name == base || name.starts_with(&format!("{base}/")))
}

fn read_zip(archive_path: &Path) -> Result<Vec<(String, Vec<u8>)>, AgentError> {
    let file = std::fs::File::open(archive_path).map_err(|e| AgentError::RuntimeFailed(format!("opening archive: {e}")))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| AgentError::InputInvalid(format!("invalid zip archive: {e}")))?;

    let mut out = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| AgentError::RuntimeFailed(format!("reading zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry
            .enclosed_name()
            .ok_or_else(|| AgentError::PathEscape(entry.name().to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(|e| AgentError::RuntimeFailed(format!("reading {name}: {e}")))?;
        out.push((name, bytes));
    }
    Ok(out)
}

fn read_tar_gz(archive_path: &Path) -> Result<Vec<(String, Vec<u8>)>, AgentError> {
    let file = std::fs::File::open(archive_path).map_err(|e| AgentError::RuntimeFailed(format!("opening archive: {e}")))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut tar = tar::Archive::new(decoder);

    let mut out = Vec::new();
    for entry in tar.entries().map_err(|e| AgentError::InputInvalid(format!("invalid tar.gz archive: {e}")))? {
        let mut entry = entry.map_err(|e| AgentError::RuntimeFailed(format!("reading tar entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().map_err(|e| AgentError::PathEscape(e.to_string()))?.to_string_lossy().replace('\\', "/");
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(|e| AgentError::RuntimeFailed(format!("reading {name}: {e}")))?;
        out.push((name, bytes));
    }
    Ok(out)
}

struct ScratchDir(PathBuf);

impl ScratchDir {
    fn new() -> Result<Self, AgentError> {
        let dir = std::env::temp_dir().join(format!("dockhand-unrar-{}-{}", std::process::id(), chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)));
        std::fs::create_dir_all(&dir).map_err(|e| AgentError::RuntimeFailed(format!("scratch dir: {e}")))?;
        Ok(Self(dir))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn read_rar(archive_path: &Path) -> Result<Vec<(String, Vec<u8>)>, AgentError> {
    // unrar has no in-memory read API; extract to a scratch directory first,
    // then re-read each file so the rest of this module stays format-agnostic.
    let scratch = ScratchDir::new()?;

    let mut archive = unrar::Archive::new(archive_path)
        .open_for_processing()
        .map_err(|e| AgentError::InputInvalid(format!("invalid rar archive: {e}")))?;

    let mut names = Vec::new();
    while let Some(header) = archive
        .read_header()
        .map_err(|e| AgentError::RuntimeFailed(format!("reading rar header: {e}")))?
    {
        let is_file = header.entry().is_file();
        let name = header.entry().filename.to_string_lossy().replace('\\', "/");
        archive = if is_file {
            names.push(name);
            header
                .extract_with_base(scratch.path())
                .map_err(|e| AgentError::RuntimeFailed(format!("extracting rar entry: {e}")))?
        } else {
            header.skip().map_err(|e| AgentError::RuntimeFailed(format!("skipping rar entry: {e}")))?
        };
    }

    let mut out = Vec::new();
    for name in names {
        let path = scratch.path().join(&name);
        let bytes = std::fs::read(&path).map_err(|e| AgentError::RuntimeFailed(format!("reading extracted {name}: {e}")))?;
        out.push((name, bytes));
    }
    Ok(out)
}
