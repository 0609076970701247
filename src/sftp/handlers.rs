//! Per-connection SFTP protocol handler.
//!
//! Mirrors the "spawn once, fan bytes in and out" shape of the teacher's
//! WebSocket↔PTY bridge (`api/agents/terminal.rs`), generalized here to a
//! request/response protocol instead of a raw duplex stream: one `Handler`
//! instance per authenticated connection, backed by the resolved server's
//! sandbox through [`PathResolver`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::sandbox::path::PathResolver;

struct OpenFile {
    handle: tokio::fs::File,
}

struct OpenDir {
    exhausted: bool,
    entries: Vec<File>,
}

/// One `Handler` per accepted SFTP channel; `resolver` roots every request
/// at a single server's sandbox, so escapes are impossible by construction
/// rather than by per-call checking.
pub struct SftpHandler {
    resolver: PathResolver,
    next_handle: AtomicU64,
    files: HashMap<String, OpenFile>,
    dirs: HashMap<String, OpenDir>,
}

impl SftpHandler {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            next_handle: AtomicU64::new(1),
            files: HashMap::new(),
            dirs: HashMap::new(),
        }
    }

    fn new_handle(&self) -> String {
        self.next_handle.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn attrs_for(metadata: &std::fs::Metadata) -> FileAttributes {
        let mut attrs = FileAttributes::default();
        attrs.size = Some(metadata.len());
        attrs.permissions = Some(unix_mode(metadata));
        if let Ok(modified) = metadata.modified() {
            if let Ok(since_epoch) = modified.duration_since(std::time::UNIX_EPOCH) {
                attrs.mtime = Some(since_epoch.as_secs() as u32);
                attrs.atime = Some(since_epoch.as_secs() as u32);
            }
        }
        attrs
    }

    fn long_name(name: &str, metadata: &std::fs::Metadata) -> String {
        let kind = if metadata.is_dir() { 'd' } else { '-' };
        let mode = unix_mode(metadata);
        let perms = format_permissions(mode);
        let size = metadata.len();
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        format!(
            "{kind}{perms} 1 owner group {size:>10} {} {name}",
            modified.format("%b %d %Y")
        )
    }

    /// `REALPATH`, `STAT` share the same "resolve then stat" shape.
    async fn stat_path(&self, path: &str) -> Result<FileAttributes, StatusCode> {
        let resolved = self.resolver.resolve(path).map_err(|_| StatusCode::NoSuchFile)?;
        let metadata = tokio::fs::metadata(&resolved).await.map_err(|_| StatusCode::NoSuchFile)?;
        Ok(Self::attrs_for(&metadata))
    }
}

fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        if metadata.is_dir() {
            0o40755
        } else {
            0o100644
        }
    }
}

fn format_permissions(mode: u32) -> String {
    let bits = [
        (0o400, 'r'), (0o200, 'w'), (0o100, 'x'),
        (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x'),
    ];
    bits.iter().map(|(bit, ch)| if mode & bit != 0 { *ch } else { '-' }).collect()
}

#[async_trait::async_trait]
impl russh_sftp::server::Handler for SftpHandler {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new_with_version(version))
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let resolved = self.resolver.resolve(&path).map_err(|_| StatusCode::NoSuchFile)?;
        let virtual_path = self.resolver.virtualize(&resolved);
        Ok(Name {
            id,
            files: vec![File::new(virtual_path, FileAttributes::default())],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = self.stat_path(&path).await?;
        Ok(Attrs { id, attrs })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = self.stat_path(&path).await?;
        Ok(Attrs { id, attrs })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let open = self.files.get(&handle).ok_or(StatusCode::Failure)?;
        let metadata = open.handle.metadata().await.map_err(|_| StatusCode::Failure)?;
        Ok(Attrs { id, attrs: Self::attrs_for(&metadata) })
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let resolved = self.resolver.resolve(&path).map_err(|_| StatusCode::NoSuchFile)?;
        let mut read_dir = tokio::fs::read_dir(&resolved).await.map_err(|_| StatusCode::NoSuchFile)?;

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Ok(metadata) = entry.metadata().await {
                let name = entry.file_name().to_string_lossy().to_string();
                let mut attrs = Self::attrs_for(&metadata);
                attrs.permissions = Some(unix_mode(&metadata));
                let long = Self::long_name(&name, &metadata);
                entries.push(File::new_with_longname(name, long, attrs));
            }
        }

        let handle = self.new_handle();
        self.dirs.insert(handle.clone(), OpenDir { exhausted: false, entries });
        Ok(Handle { id, handle })
    }

    /// One-shot: the first call returns every entry, the second returns
    /// `EOF`, matching the spec's required `READDIR` semantics.
    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let dir = self.dirs.get_mut(&handle).ok_or(StatusCode::Failure)?;
        if dir.exhausted {
            return Err(StatusCode::Eof);
        }
        dir.exhausted = true;
        Ok(Name { id, files: std::mem::take(&mut dir.entries) })
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let resolved = self.resolver.resolve(&filename).map_err(|_| StatusCode::Failure)?;
        let wants_write = pflags.contains(OpenFlags::WRITE) || pflags.contains(OpenFlags::CREATE);

        if wants_write {
            if let Some(parent) = resolved.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(wants_write)
            .create(wants_write)
            .truncate(wants_write)
            .open(&resolved)
            .await
            .map_err(|_| StatusCode::NoSuchFile)?;

        let handle = self.new_handle();
        self.files.insert(handle.clone(), OpenFile { handle: file });
        Ok(Handle { id, handle })
    }

    async fn read(&mut self, id: u32, handle: String, offset: u64, len: u32) -> Result<Data, Self::Error> {
        let open = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        open.handle.seek(std::io::SeekFrom::Start(offset)).await.map_err(|_| StatusCode::Failure)?;

        let mut buf = vec![0u8; len as usize];
        let read = open.handle.read(&mut buf).await.map_err(|_| StatusCode::Failure)?;
        if read == 0 {
            return Err(StatusCode::Eof);
        }
        buf.truncate(read);
        Ok(Data { id, data: buf })
    }

    async fn write(&mut self, id: u32, handle: String, offset: u64, data: Vec<u8>) -> Result<Status, Self::Error> {
        let open = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        open.handle.seek(std::io::SeekFrom::Start(offset)).await.map_err(|_| StatusCode::Failure)?;
        open.handle.write_all(&data).await.map_err(|_| StatusCode::Failure)?;
        Ok(ok_status(id))
    }

    /// Releases the handle from whichever table holds it — the spec treats
    /// `CLOSE` as valid for both file and directory handles.
    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        if self.files.remove(&handle).is_some() || self.dirs.remove(&handle).is_some() {
            Ok(ok_status(id))
        } else {
            Err(StatusCode::Failure)
        }
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        let resolved = self.resolver.resolve(&filename).map_err(|_| StatusCode::Failure)?;
        tokio::fs::remove_file(&resolved).await.map_err(|_| StatusCode::Failure)?;
        Ok(ok_status(id))
    }

    async fn mkdir(&mut self, id: u32, path: String, _attrs: FileAttributes) -> Result<Status, Self::Error> {
        let resolved = self.resolver.resolve(&path).map_err(|_| StatusCode::Failure)?;
        tokio::fs::create_dir_all(&resolved).await.map_err(|_| StatusCode::Failure)?;
        Ok(ok_status(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        let resolved = self.resolver.resolve(&path).map_err(|_| StatusCode::Failure)?;
        tokio::fs::remove_dir(&resolved).await.map_err(|_| StatusCode::Failure)?;
        Ok(ok_status(id))
    }

    async fn rename(&mut self, id: u32, oldpath: String, newpath: String) -> Result<Status, Self::Error> {
        let from = self.resolver.resolve(&oldpath).map_err(|_| StatusCode::Failure)?;
        let to = self.resolver.resolve(&newpath).map_err(|_| StatusCode::Failure)?;
        tokio::fs::rename(&from, &to).await.map_err(|_| StatusCode::Failure)?;
        Ok(ok_status(id))
    }
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> (tempfile::TempDir, SftpHandler) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path()).unwrap();
        let resolver = PathResolver::new(tmp.path()).unwrap();
        (tmp, SftpHandler::new(resolver))
    }

    #[test]
    fn format_permissions_round_trips_common_modes() {
        assert_eq!(format_permissions(0o755), "rwxr-xr-x");
        assert_eq!(format_permissions(0o644), "rw-r--r--");
    }

    #[tokio::test]
    async fn mkdir_then_stat_reports_directory() {
        let (_tmp, mut h) = handler();
        h.mkdir(1, "/sub".to_string(), FileAttributes::default()).await.unwrap();
        let attrs = h.stat(2, "/sub".to_string()).await.unwrap();
        assert!(attrs.attrs.is_dir());
    }

    #[tokio::test]
    async fn readdir_is_one_shot() {
        let (tmp, mut h) = handler();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();

        let handle = h.opendir(1, "/".to_string()).await.unwrap().handle;
        let first = h.readdir(2, handle.clone()).await.unwrap();
        assert_eq!(first.files.len(), 1);

        let second = h.readdir(3, handle).await;
        assert!(matches!(second, Err(StatusCode::Eof)));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_tmp, mut h) = handler();
        let handle = h
            .open(1, "/file.txt".to_string(), OpenFlags::WRITE | OpenFlags::CREATE, FileAttributes::default())
            .await
            .unwrap()
            .handle;
        h.write(2, handle.clone(), 0, b"hello".to_vec()).await.unwrap();
        h.close(3, handle.clone()).await.unwrap();

        let handle = h.open(4, "/file.txt".to_string(), OpenFlags::empty(), FileAttributes::default()).await.unwrap().handle;
        let data = h.read(5, handle, 0, 16).await.unwrap();
        assert_eq!(data.data, b"hello");
    }
}
