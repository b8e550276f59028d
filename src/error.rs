//! Error types shared by the services and the HTTP gateway.
//!
//! Services return [`Error`]; the gateway classifies it with [`Error::kind`]
//! and turns it into a status code and a machine-readable reason code.

use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification used to pick the HTTP status of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidRequest,
    UploadFailure,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid page request: {0}")]
    InvalidPageRequest(String),

    #[error("no such job: {0}")]
    NoSuchJob(String),

    #[error("no such job instance: {0}")]
    NoSuchJobInstance(i64),

    #[error("no such job execution: {0}")]
    NoSuchExecution(i64),

    #[error("no such step execution {step_execution_id} in job execution {job_execution_id}")]
    NoSuchStepExecution {
        job_execution_id: i64,
        step_execution_id: i64,
    },

    #[error("job {0} is already running")]
    JobAlreadyRunning(String),

    #[error("job instance already complete for job {0} with these parameters")]
    JobInstanceAlreadyComplete(String),

    #[error("job execution {0} is not restartable")]
    JobNotRestartable(i64),

    #[error("invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("file already exists: {0}")]
    PathConflict(String),

    #[error(transparent)]
    Upload(#[from] UploadFailure),

    #[error("job repository failure: {0}")]
    Repository(String),

    #[error("file store failure: {0}")]
    Store(#[from] io::Error),
}

/// Why an upload did not produce a published file.
#[derive(Debug, thiserror::Error)]
pub enum UploadFailure {
    #[error("file upload was empty for filename=[{filename}]")]
    Empty { filename: String },

    #[error("file upload failed for {filename}")]
    Transfer {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("file upload failed downstream processing for {filename}")]
    Downstream { filename: String, message: String },
}

impl UploadFailure {
    pub fn reason_code(&self) -> &'static str {
        match self {
            UploadFailure::Empty { .. } => "file.upload.empty",
            UploadFailure::Transfer { .. } => "file.upload.failed",
            UploadFailure::Downstream { .. } => "file.upload.failed.downstream",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoSuchJob(_)
            | Error::NoSuchJobInstance(_)
            | Error::NoSuchExecution(_)
            | Error::NoSuchStepExecution { .. } => ErrorKind::NotFound,
            Error::JobAlreadyRunning(_)
            | Error::JobInstanceAlreadyComplete(_)
            | Error::JobNotRestartable(_)
            | Error::PathConflict(_) => ErrorKind::Conflict,
            Error::InvalidRequest(_)
            | Error::InvalidPageRequest(_)
            | Error::InvalidParameters(_)
            | Error::InvalidPath(_)
            | Error::InvalidPattern(_) => ErrorKind::InvalidRequest,
            Error::Upload(_) => ErrorKind::UploadFailure,
            Error::Repository(_) | Error::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable reason code exposed to API clients.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "request.invalid",
            Error::InvalidPageRequest(_) => "page.invalid",
            Error::NoSuchJob(_) => "job.not.found",
            Error::NoSuchJobInstance(_) => "job.instance.not.found",
            Error::NoSuchExecution(_) => "job.execution.not.found",
            Error::NoSuchStepExecution { .. } => "step.execution.not.found",
            Error::JobAlreadyRunning(_) => "job.already.running",
            Error::JobInstanceAlreadyComplete(_) => "job.instance.already.complete",
            Error::JobNotRestartable(_) => "job.not.restartable",
            Error::InvalidParameters(_) => "job.parameters.invalid",
            Error::InvalidPath(_) => "file.path.invalid",
            Error::InvalidPattern(_) => "file.pattern.invalid",
            Error::PathConflict(_) => "file.path.conflict",
            Error::Upload(failure) => failure.reason_code(),
            Error::Repository(_) | Error::Store(_) => "internal.error",
        }
    }
}
