//! Sandbox Path Resolver (C1).
//!
//! Confines every user-supplied path to `BASE_SERVER_PATH/{id}` by textual
//! normalization and a prefix check — never by following symlinks.

use std::path::{Component, Path, PathBuf};

use crate::error::AgentError;

/// Resolves guest-relative paths against one server's sandbox root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// `root` must already exist; the resolver canonicalizes it once up
    /// front so every resolution is relative to a stable, symlink-free base.
    pub fn new(root: &Path) -> Result<Self, AgentError> {
        let canonical = root
            .canonicalize()
            .map_err(|e| AgentError::RuntimeFailed(format!("sandbox root unusable: {e}")))?;
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path into an absolute host path guaranteed to
    /// be a descendant of [`Self::root`].
    ///
    /// Empty, `/`, and `.` resolve to the root itself. Backslashes are
    /// normalized to forward slashes before splitting into components, and
    /// any `..` segment that would escape the root fails with
    /// [`AgentError::PathEscape`].
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf, AgentError> {
        let normalized_input = user_path.replace('\\', "/");
        let trimmed = normalized_input.trim_start_matches('/');
        let guest = Path::new(trimmed);

        let mut normalized = PathBuf::new();
        for component in guest.components() {
            match component {
                Component::Normal(seg) => normalized.push(seg),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(AgentError::PathEscape(user_path.to_string()));
                    }
                }
                // `RootDir` was stripped above; `Prefix` only occurs on Windows.
                Component::RootDir | Component::Prefix(_) => {}
            }
        }

        let resolved = self.root.join(&normalized);
        if resolved != self.root && !resolved.starts_with(&self.root) {
            return Err(AgentError::PathEscape(user_path.to_string()));
        }
        Ok(resolved)
    }

    /// Maps an absolute host path (known to be inside [`Self::root`]) back to
    /// the virtual `/`-rooted view exposed via SFTP.
    pub fn virtualize(&self, abs: &Path) -> String {
        match abs.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
            Ok(rel) => format!("/{}", rel.to_string_lossy().replace('\\', "/")),
            Err(_) => "/".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> (tempfile::TempDir, PathResolver) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("server-1");
        std::fs::create_dir_all(&root).unwrap();
        let resolver = PathResolver::new(&root).unwrap();
        (tmp, resolver)
    }

    #[test]
    fn empty_and_root_and_dot_map_to_root() {
        let (_tmp, r) = resolver();
        assert_eq!(r.resolve("").unwrap(), r.root());
        assert_eq!(r.resolve("/").unwrap(), r.root());
        assert_eq!(r.resolve(".").unwrap(), r.root());
    }

    #[test]
    fn plain_relative_path_resolves_under_root() {
        let (_tmp, r) = resolver();
        assert_eq!(r.resolve("foo/bar.txt").unwrap(), r.root().join("foo/bar.txt"));
        assert_eq!(r.resolve("/foo/bar.txt").unwrap(), r.root().join("foo/bar.txt"));
    }

    #[test]
    fn backslashes_normalized() {
        let (_tmp, r) = resolver();
        assert_eq!(r.resolve("foo\\bar.txt").unwrap(), r.root().join("foo/bar.txt"));
    }

    #[test]
    fn parent_dir_escape_rejected() {
        let (_tmp, r) = resolver();
        assert!(matches!(r.resolve("../escape"), Err(AgentError::PathEscape(_))));
        assert!(matches!(r.resolve("foo/../../escape"), Err(AgentError::PathEscape(_))));
    }

    #[test]
    fn parent_dir_that_stays_inside_root_is_allowed() {
        let (_tmp, r) = resolver();
        assert_eq!(r.resolve("foo/../bar.txt").unwrap(), r.root().join("bar.txt"));
    }

    #[test]
    fn virtualize_roundtrips() {
        let (_tmp, r) = resolver();
        let abs = r.resolve("a/b.txt").unwrap();
        assert_eq!(r.virtualize(&abs), "/a/b.txt");
        assert_eq!(r.virtualize(r.root()), "/");
    }
}
