use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FileStore, STAGING_PREFIX, StagePath, StagedWrite, StoredFile};

/// Staging area backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &StagePath) -> PathBuf {
        self.root.join(path.as_str())
    }
}

fn stored_file(path: StagePath, metadata: &fs::Metadata) -> StoredFile {
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    StoredFile {
        path,
        modified,
        size: metadata.len(),
        local: true,
    }
}

fn scan_recursive(base: &Path, current: &Path, files: &mut Vec<StoredFile>) -> io::Result<()> {
    let entries = match fs::read_dir(current) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        // Do not follow symlinks out of the staging area
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            scan_recursive(base, &path, files)?;
            continue;
        }
        if !metadata.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(base) else {
            continue;
        };
        match StagePath::parse(&relative.to_string_lossy()) {
            Ok(stage_path) => files.push(stored_file(stage_path, &metadata)),
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unaddressable entry"),
        }
    }

    Ok(())
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn list(&self) -> io::Result<Vec<StoredFile>> {
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            scan_recursive(&root, &root, &mut files)?;
            files.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(files)
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn stat(&self, path: &StagePath) -> io::Result<Option<StoredFile>> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(stored_file(path.clone(), &metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, path: &StagePath) -> io::Result<StoredFile> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&target).await?;
        let metadata = file.metadata().await?;
        Ok(stored_file(path.clone(), &metadata))
    }

    async fn stage(&self, path: &StagePath) -> io::Result<Box<dyn StagedWrite>> {
        let target = self.resolve(path);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent).await?;

        let temp = parent.join(format!("{}{}.part", STAGING_PREFIX, Uuid::now_v7()));
        let file = tokio::fs::File::create(&temp).await?;
        debug!(path = %path, temp = %temp.display(), "Staged upload opened");

        Ok(Box::new(LocalStagedFile {
            path: path.clone(),
            target,
            temp,
            file: Some(file),
            committed: false,
        }))
    }

    async fn delete(&self, path: &StagePath) -> io::Result<bool> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

struct LocalStagedFile {
    path: StagePath,
    target: PathBuf,
    temp: PathBuf,
    file: Option<tokio::fs::File>,
    committed: bool,
}

#[async_trait]
impl StagedWrite for LocalStagedFile {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(chunk).await,
            None => Err(io::Error::other("staged file already closed")),
        }
    }

    async fn commit(self: Box<Self>) -> io::Result<StoredFile> {
        let mut staged = self;
        let mut file = staged
            .file
            .take()
            .ok_or_else(|| io::Error::other("staged file already closed"))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&staged.temp, &staged.target).await?;
        staged.committed = true;

        let metadata = tokio::fs::metadata(&staged.target).await?;
        Ok(stored_file(staged.path.clone(), &metadata))
    }
}

impl Drop for LocalStagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close the handle before unlinking
        self.file.take();
        if let Err(e) = fs::remove_file(&self.temp) {
            if e.kind() != ErrorKind::NotFound {
                warn!(temp = %self.temp.display(), error = %e, "Failed to discard staged upload");
            }
        }
    }
}
