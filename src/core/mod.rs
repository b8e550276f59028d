pub mod control;
pub mod files;
pub mod jobs;
pub mod links;
pub mod models;
pub mod page;
pub mod pattern;
pub mod progress;
pub mod publish;

pub use control::{JobControlService, parse_job_parameters};
pub use files::FileStagingService;
pub use jobs::JobQueryService;
pub use links::{LinkedResource, PagedResources, ResourceId};
pub use models::{FileInfo, JobDetail, JobExecutionInfo, JobInstanceInfo, JobSummary, StepExecutionInfo};
pub use page::{Page, PageRequest};
pub use progress::{StepExecutionHistory, StepExecutionProgressInfo};
pub use publish::Publisher;
