//! Durable storage for staged files.

mod local;

use std::fmt;
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

pub use local::LocalFileStore;

/// Name prefix reserved for in-flight uploads; never listed, never addressable.
pub(crate) const STAGING_PREFIX: &str = ".upload-";

/// A normalized, relative, `/`-separated path inside the staging area.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StagePath(String);

impl StagePath {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" => continue,
                "." | ".." => {
                    return Err(Error::InvalidPath(format!(
                        "{}: relative segments are not allowed",
                        raw
                    )));
                }
                s if s.starts_with(STAGING_PREFIX) => {
                    return Err(Error::InvalidPath(format!("{}: reserved name", raw)));
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(Error::InvalidPath(format!("{:?}: empty path", raw)));
        }
        Ok(Self(segments.join("/")))
    }

    /// `{directory}/{file_name}`, where only the last component of `file_name` is kept.
    pub fn in_directory(directory: &str, file_name: &str) -> Result<Self> {
        let name = file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        if name.is_empty() {
            return Err(Error::InvalidPath("missing file name".to_string()));
        }
        Self::parse(&format!("{}/{}", directory, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for StagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: StagePath,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub local: bool,
}

/// Storage backend for the staging area.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// All entries, ordered by path.
    async fn list(&self) -> io::Result<Vec<StoredFile>>;
    async fn stat(&self, path: &StagePath) -> io::Result<Option<StoredFile>>;
    /// Create (or truncate) an empty entry.
    async fn create(&self, path: &StagePath) -> io::Result<StoredFile>;
    /// Open a hidden write handle that only becomes visible at `path` on commit.
    async fn stage(&self, path: &StagePath) -> io::Result<Box<dyn StagedWrite>>;
    /// Remove an entry. `Ok(false)` when it was already gone.
    async fn delete(&self, path: &StagePath) -> io::Result<bool>;
}

/// An in-progress write. Dropping it without committing discards the bytes.
#[async_trait]
pub trait StagedWrite: Send {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
    async fn commit(self: Box<Self>) -> io::Result<StoredFile>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_separators() {
        assert_eq!(StagePath::parse("/foo//bar.txt").unwrap().as_str(), "foo/bar.txt");
        assert_eq!(StagePath::parse("foo\\baz.txt").unwrap().as_str(), "foo/baz.txt");
    }

    #[test]
    fn parse_rejects_escapes_and_reserved_names() {
        assert!(StagePath::parse("../etc/passwd").is_err());
        assert!(StagePath::parse("foo/./bar").is_err());
        assert!(StagePath::parse("/").is_err());
        assert!(StagePath::parse("foo/.upload-123.part").is_err());
    }

    #[test]
    fn in_directory_keeps_only_the_file_name() {
        let path = StagePath::in_directory("/foo", "C:\\Users\\me\\bar.txt").unwrap();
        assert_eq!(path.as_str(), "foo/bar.txt");
        assert_eq!(path.file_name(), "bar.txt");
        assert!(StagePath::in_directory("foo", "").is_err());
    }
}
