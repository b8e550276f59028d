use std::sync::Arc;
use std::time::Instant;

use tracing::info_span;

use crate::config::AppConfig;
use crate::core::publish::{Publisher, create_channel};
use crate::core::{FileStagingService, JobControlService, JobQueryService};
use crate::engine::JobRepository;
use crate::store::FileStore;

/// Everything a request handler needs, shared across the server.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub repository: Arc<dyn JobRepository>,
    pub files: Arc<FileStagingService>,
    pub jobs: Arc<JobQueryService>,
    pub control: Arc<JobControlService>,
    pub started: Instant,
}

impl AppContext {
    pub fn new(config: AppConfig, repository: Arc<dyn JobRepository>, store: Arc<dyn FileStore>) -> Self {
        let publisher = Publisher::new(create_channel(&config.publish));
        Self::with_publisher(config, repository, store, publisher)
    }

    pub fn with_publisher(
        config: AppConfig,
        repository: Arc<dyn JobRepository>,
        store: Arc<dyn FileStore>,
        publisher: Publisher,
    ) -> Self {
        let files = Arc::new(FileStagingService::new(
            store,
            publisher,
            &config.files,
            info_span!("files"),
        ));
        let jobs = Arc::new(JobQueryService::new(repository.clone(), info_span!("jobs")));
        let control = Arc::new(JobControlService::new(
            repository.clone(),
            jobs.clone(),
            info_span!("control"),
        ));

        Self {
            config: Arc::new(config),
            repository,
            files,
            jobs,
            control,
            started: Instant::now(),
        }
    }
}
