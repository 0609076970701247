//! File Manager Service (C8): request-response file operations over a
//! server's sandbox, served over HTTP and sharing the same sandbox
//! directories as C4 (bind mount) and C9 (SFTP).
//!
//! Every operation resolves its paths through a [`PathResolver`] first; no
//! operation here ever touches a path that hasn't cleared C1.

pub mod archive;

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AgentError;
use crate::sandbox::path::PathResolver;

/// 2 MiB, per spec §4.8.
const MAX_READ_BYTES: u64 = 2 * 1024 * 1024;
/// 25 MiB, per spec §4.8.
const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub size: Option<u64>,
    pub last_modified: DateTime<Utc>,
    pub path: String,
}

fn modified_of(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

pub fn list(resolver: &PathResolver, path: &str) -> Result<Vec<Entry>, AgentError> {
    let dir = resolver.resolve(path)?;
    let read_dir = std::fs::read_dir(&dir).map_err(|e| AgentError::RuntimeFailed(format!("listing {}: {e}", dir.display())))?;

    let mut entries = Vec::new();
    for item in read_dir {
        let item = item.map_err(|e| AgentError::RuntimeFailed(format!("reading directory entry: {e}")))?;
        let meta = item.metadata().map_err(|e| AgentError::RuntimeFailed(format!("stat failed: {e}")))?;
        let name = item.file_name().to_string_lossy().into_owned();
        entries.push(Entry {
            entry_type: if meta.is_dir() { "directory" } else { "file" },
            size: if meta.is_dir() { None } else { Some(meta.len()) },
            last_modified: modified_of(&meta),
            path: resolver.virtualize(&item.path()),
            name,
        });
    }
    Ok(entries)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content: String,
}

pub fn read(resolver: &PathResolver, path: &str) -> Result<ReadResult, AgentError> {
    let target = resolver.resolve(path)?;
    let meta = std::fs::metadata(&target).map_err(|e| AgentError::RuntimeFailed(format!("stat failed: {e}")))?;
    if meta.is_dir() {
        return Err(AgentError::InputInvalid(format!("{path} is a directory")));
    }
    if meta.len() > MAX_READ_BYTES {
        return Err(AgentError::PayloadTooLarge(meta.len(), MAX_READ_BYTES));
    }

    let bytes = std::fs::read(&target).map_err(|e| AgentError::RuntimeFailed(format!("read failed: {e}")))?;
    let content = String::from_utf8(bytes).map_err(|_| AgentError::InputInvalid(format!("{path} is not valid UTF-8")))?;

    Ok(ReadResult {
        path: resolver.virtualize(&target),
        size: meta.len(),
        last_modified: modified_of(&meta),
        content,
    })
}

pub fn write(resolver: &PathResolver, path: &str, content: &str) -> Result<(), AgentError> {
    let target = resolver.resolve(path)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AgentError::RuntimeFailed(format!("creating parent dirs: {e}")))?;
    }
    std::fs::write(&target, content).map_err(|e| AgentError::RuntimeFailed(format!("write failed: {e}")))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameResult {
    pub old_path: String,
    pub new_path: String,
}

pub fn rename(resolver: &PathResolver, path: &str, new_name: &str) -> Result<RenameResult, AgentError> {
    if new_name.contains('/') || new_name.contains('\\') || new_name.is_empty() {
        return Err(AgentError::InputInvalid("newName must be a bare filename".to_string()));
    }
    let old = resolver.resolve(path)?;
    let parent = old.parent().ok_or_else(|| AgentError::InputInvalid("cannot rename the sandbox root".to_string()))?;
    let new = parent.join(new_name);

    std::fs::rename(&old, &new).map_err(|e| AgentError::RuntimeFailed(format!("rename failed: {e}")))?;
    Ok(RenameResult {
        old_path: resolver.virtualize(&old),
        new_path: resolver.virtualize(&new),
    })
}

#[derive(Debug, Serialize)]
pub struct DownloadResult {
    pub file_name: String,
    pub size: u64,
    pub base64: String,
}

pub fn download(resolver: &PathResolver, path: &str) -> Result<DownloadResult, AgentError> {
    let target = resolver.resolve(path)?;
    let meta = std::fs::metadata(&target).map_err(|e| AgentError::RuntimeFailed(format!("stat failed: {e}")))?;
    if meta.is_dir() {
        return Err(AgentError::InputInvalid(format!("{path} is a directory")));
    }

    let bytes = std::fs::read(&target).map_err(|e| AgentError::RuntimeFailed(format!("read failed: {e}")))?;
    Ok(DownloadResult {
        file_name: target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        size: bytes.len() as u64,
        base64: base64_encode(&bytes),
    })
}

pub fn mkdir(resolver: &PathResolver, path: &str) -> Result<String, AgentError> {
    if path.trim().is_empty() || path.trim() == "/" {
        return Err(AgentError::InputInvalid("path must not be empty".to_string()));
    }
    let target = resolver.resolve(path)?;
    std::fs::create_dir_all(&target).map_err(|e| AgentError::RuntimeFailed(format!("mkdir failed: {e}")))?;
    Ok(resolver.virtualize(&target))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub entry_type: &'static str,
}

pub fn mv(resolver: &PathResolver, from: &str, to: &str) -> Result<MoveResult, AgentError> {
    let src = resolver.resolve(from)?;
    let src_meta = std::fs::metadata(&src).map_err(|e| AgentError::RuntimeFailed(format!("stat failed: {e}")))?;

    let mut dest = resolver.resolve(to)?;
    let destination_is_dir = to.ends_with('/') || to.ends_with('\\') || dest.is_dir();
    if destination_is_dir {
        let basename = src
            .file_name()
            .ok_or_else(|| AgentError::InputInvalid("source has no basename".to_string()))?;
        if !dest.exists() {
            std::fs::create_dir_all(&dest).map_err(|e| AgentError::RuntimeFailed(format!("mkdir failed: {e}")))?;
        }
        dest = dest.join(basename);
    }

    std::fs::rename(&src, &dest).map_err(|e| AgentError::RuntimeFailed(format!("move failed: {e}")))?;
    Ok(MoveResult {
        from: resolver.virtualize(&src),
        to: resolver.virtualize(&dest),
        entry_type: if src_meta.is_dir() { "directory" } else { "file" },
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub path: String,
    pub size: u64,
}

pub fn upload(resolver: &PathResolver, path: &str, bytes: &[u8]) -> Result<UploadResult, AgentError> {
    if bytes.len() as u64 > MAX_UPLOAD_BYTES {
        return Err(AgentError::PayloadTooLarge(bytes.len() as u64, MAX_UPLOAD_BYTES));
    }
    let target = resolver.resolve(path)?;
    if target.file_name().is_none() {
        return Err(AgentError::InputInvalid("path must include a filename".to_string()));
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AgentError::RuntimeFailed(format!("creating parent dirs: {e}")))?;
    }
    std::fs::write(&target, bytes).map_err(|e| AgentError::RuntimeFailed(format!("write failed: {e}")))?;
    Ok(UploadResult {
        path: resolver.virtualize(&target),
        size: bytes.len() as u64,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MassEntryResult {
    pub path: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MassResult {
    pub results: Vec<MassEntryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
}

pub fn mass_delete(resolver: &PathResolver, paths: &[String]) -> MassResult {
    let results = paths
        .iter()
        .map(|path| match resolver.resolve(path) {
            Ok(target) => {
                let outcome = if target.is_dir() {
                    std::fs::remove_dir_all(&target)
                } else {
                    std::fs::remove_file(&target)
                };
                match outcome {
                    Ok(()) => MassEntryResult { path: path.clone(), status: "ok", error: None },
                    Err(e) => MassEntryResult { path: path.clone(), status: "error", error: Some(e.to_string()) },
                }
            }
            Err(e) => MassEntryResult { path: path.clone(), status: "error", error: Some(e.to_string()) },
        })
        .collect();
    MassResult { results, archive: None }
}

pub fn mass_archive(resolver: &PathResolver, paths: &[String], archive_name: Option<&str>) -> Result<MassResult, AgentError> {
    let name = archive_name
        .map(|n| n.to_string())
        .unwrap_or_else(|| format!("archive-{}", Utc::now().timestamp_millis()));
    let archive_path = resolver.resolve(&format!("{name}.zip"))?;

    let mut members = Vec::new();
    let mut results = Vec::new();
    for path in paths {
        match resolver.resolve(path) {
            Ok(target) if target.exists() => {
                members.push((target, path.clone()));
                results.push(MassEntryResult { path: path.clone(), status: "ok", error: None });
            }
            Ok(_) => results.push(MassEntryResult {
                path: path.clone(),
                status: "error",
                error: Some("not found".to_string()),
            }),
            Err(e) => results.push(MassEntryResult { path: path.clone(), status: "error", error: Some(e.to_string()) }),
        }
    }

    archive::create_zip(resolver.root(), &archive_path, &members)?;

    Ok(MassResult {
        results,
        archive: Some(resolver.virtualize(&archive_path)),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnarchiveResult {
    pub archive: String,
    pub destination: String,
    pub flattened: bool,
    pub results: Vec<MassEntryResult>,
}

pub fn unarchive(resolver: &PathResolver, path: &str, destination: Option<&str>) -> Result<UnarchiveResult, AgentError> {
    let archive_path = resolver.resolve(path)?;
    let base_name = archive::base_name(&archive_path);

    let dest_virtual = destination.unwrap_or(&base_name);
    let dest_path = resolver.resolve(dest_virtual)?;
    std::fs::create_dir_all(&dest_path).map_err(|e| AgentError::RuntimeFailed(format!("creating destination: {e}")))?;

    let outcome = archive::extract(&archive_path, &dest_path, resolver.root(), &base_name, destination.is_some())?;

    Ok(UnarchiveResult {
        archive: resolver.virtualize(&archive_path),
        destination: resolver.virtualize(&dest_path),
        flattened: outcome.flattened,
        results: outcome
            .entries
            .into_iter()
            .map(|e| MassEntryResult { path: e, status: "ok", error: None })
            .collect(),
    })
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn base64_decode(s: &str) -> Result<Vec<u8>, AgentError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| AgentError::InputInvalid(format!("invalid base64: {e}")))
}

/// Used by [`archive::extract`] to reject an extraction target outside `root`.
pub(crate) fn ensure_within(root: &Path, candidate: &Path) -> Result<PathBuf, AgentError> {
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        use std::path::Component;
        match component {
            Component::Normal(seg) => normalized.push(seg),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AgentError::PathEscape(candidate.to_string_lossy().into_owned()));
            }
        }
    }
    let resolved = root.join(&normalized);
    if resolved != *root && !resolved.starts_with(root) {
        return Err(AgentError::PathEscape(candidate.to_string_lossy().into_owned()));
    }
    Ok(resolved)
}

pub(crate) fn write_file_bytes(path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AgentError::RuntimeFailed(format!("creating parent dirs: {e}")))?;
    }
    let mut file = std::fs::File::create(path).map_err(|e| AgentError::RuntimeFailed(format!("create failed: {e}")))?;
    file.write_all(bytes).map_err(|e| AgentError::RuntimeFailed(format!("write failed: {e}")))
}
