//! The staging area: listing, uploads, publishing and pattern deletes.

use std::io;
use std::sync::Arc;

use chrono::SecondsFormat;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use super::models::FileInfo;
use super::pattern::GlobPattern;
use super::publish::Publisher;
use crate::config::FilesConfig;
use crate::error::{Error, Result, UploadFailure};
use crate::store::{FileStore, StagePath, StagedWrite, StoredFile};

/// Buffer size for upload transfers
const BUFFER_SIZE: usize = 64 * 1024;

pub struct FileStagingService {
    store: Arc<dyn FileStore>,
    publisher: Publisher,
    short_path_root: String,
    allow_overwrite: bool,
    span: Span,
}

impl FileStagingService {
    pub fn new(store: Arc<dyn FileStore>, publisher: Publisher, config: &FilesConfig, span: Span) -> Self {
        Self {
            store,
            publisher,
            short_path_root: config.short_path_root.clone(),
            allow_overwrite: config.allow_overwrite,
            span,
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    fn file_info(&self, stored: &StoredFile) -> FileInfo {
        FileInfo::new(
            stored.path.as_str(),
            stored.modified.to_rfc3339_opts(SecondsFormat::Millis, true),
            stored.local,
            &self.short_path_root,
        )
    }

    /// One window of staged files, ordered by path, plus the total count.
    pub async fn list(&self, offset: u64, limit: u64) -> Result<(Vec<FileInfo>, u64)> {
        let stored = self.store.list().await?;
        let total = stored.len() as u64;
        let files = stored
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|f| self.file_info(f))
            .collect();
        Ok((files, total))
    }

    /// Remove every staged file matching `pattern` and return how many were
    /// actually removed. Removals are independent: a failure is logged and
    /// the remaining matches are still attempted.
    pub async fn delete(&self, pattern: &str) -> Result<usize> {
        let glob = GlobPattern::new(pattern)?;
        let span = info_span!(parent: &self.span, "delete", pattern = %glob.as_str());

        async {
            let matched: Vec<StoredFile> = self
                .store
                .list()
                .await?
                .into_iter()
                .filter(|f| glob.matches(f.path.as_str()))
                .collect();

            let mut deleted = 0;
            for file in &matched {
                match self.store.delete(&file.path).await {
                    Ok(true) => deleted += 1,
                    Ok(false) => debug!(path = %file.path, "Already removed"),
                    Err(e) => warn!(path = %file.path, error = %e, "Failed to delete staged file"),
                }
            }

            info!(matched = matched.len(), deleted, "Pattern delete complete");
            Ok(deleted)
        }
        .instrument(span)
        .await
    }

    async fn check_overwrite(&self, path: &StagePath) -> Result<()> {
        if !self.allow_overwrite && self.store.stat(path).await?.is_some() {
            return Err(Error::PathConflict(path.to_string()));
        }
        Ok(())
    }

    /// Create an empty staged file at `path`.
    pub async fn create_file(&self, path: &str) -> Result<FileInfo> {
        let path = StagePath::parse(path)?;
        self.check_overwrite(&path).await?;
        let stored = self.store.create(&path).await?;
        debug!(parent: &self.span, path = %path, "Created staged file");
        Ok(self.file_info(&stored))
    }

    /// Stream `content` into a staged file at `path`.
    ///
    /// Empty content is rejected before the store is touched. Bytes go to a
    /// hidden staged file that only appears at `path` once fully written;
    /// any failure discards it.
    pub async fn upload<R>(&self, path: &str, content: R) -> Result<FileInfo>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = StagePath::parse(path)?;
        let span = info_span!(parent: &self.span, "upload", path = %path);
        self.upload_to(&path, content).instrument(span).await
    }

    async fn upload_to<R>(&self, path: &StagePath, mut content: R) -> Result<FileInfo>
    where
        R: AsyncRead + Unpin + Send,
    {
        let filename = path.file_name().to_string();
        let transfer = |source: io::Error| {
            Error::from(UploadFailure::Transfer {
                filename: filename.clone(),
                source,
            })
        };

        self.check_overwrite(path).await?;

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut staged: Option<Box<dyn StagedWrite>> = None;
        let mut bytes: u64 = 0;

        loop {
            let n = content.read(&mut buffer).await.map_err(transfer)?;
            if n == 0 {
                break;
            }
            if staged.is_none() {
                staged = Some(self.store.stage(path).await.map_err(transfer)?);
            }
            if let Some(writer) = staged.as_mut() {
                writer.write(&buffer[..n]).await.map_err(transfer)?;
            }
            bytes += n as u64;
        }

        let Some(staged) = staged else {
            info!(filename = %filename, "Rejected empty upload");
            return Err(UploadFailure::Empty { filename }.into());
        };

        let stored = staged.commit().await.map_err(transfer)?;
        info!(bytes, "Upload complete");
        Ok(FileInfo {
            upload_id: Some(Uuid::now_v7()),
            ..self.file_info(&stored)
        })
    }

    /// Make an uploaded file visible downstream. Publishing the same file
    /// twice has no further effect.
    pub async fn publish(&self, file: &FileInfo) -> Result<()> {
        match self.publisher.publish(file).await {
            Ok(true) => {
                info!(parent: &self.span, path = %file.path, "File published");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(parent: &self.span, path = %file.path, error = %e, "File upload failed downstream processing");
                Err(UploadFailure::Downstream {
                    filename: file.short_path.clone(),
                    message: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Upload to `{directory}/{filename}` and publish the result. Nothing is
    /// published unless the upload fully succeeded.
    pub async fn upload_and_publish<R>(&self, directory: &str, filename: &str, content: R) -> Result<FileInfo>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = StagePath::in_directory(directory, filename)?;
        let span = info_span!(parent: &self.span, "upload", path = %path);
        let file = self.upload_to(&path, content).instrument(span).await?;
        self.publish(&file).await?;
        Ok(file)
    }
}
