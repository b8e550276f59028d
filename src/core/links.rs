//! Hypermedia links for API resources.
//!
//! Every addressable entity names itself through a [`ResourceId`]; links are
//! then a pure function of that identifier and the route the entity is served
//! under.

use serde::Serialize;
use url::form_urlencoded;

use super::models::{FileInfo, JobDetail, JobExecutionInfo, JobInstanceInfo, JobSummary, StepExecutionInfo};
use super::page::Page;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

impl Link {
    pub fn new(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
        }
    }

    pub fn self_link(href: impl Into<String>) -> Self {
        Self::new("self", href)
    }
}

/// Natural key of an addressable entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    File(String),
    Job(String),
    JobInstance(i64),
    JobExecution(i64),
    StepExecution {
        job_execution_id: i64,
        step_execution_id: i64,
    },
}

impl ResourceId {
    /// Path relative to the entity's collection route.
    pub fn path(&self) -> String {
        match self {
            ResourceId::File(path) => path.split('/').map(encode_segment).collect::<Vec<_>>().join("/"),
            ResourceId::Job(name) => encode_segment(name),
            ResourceId::JobInstance(id) | ResourceId::JobExecution(id) => id.to_string(),
            ResourceId::StepExecution {
                job_execution_id,
                step_execution_id,
            } => format!("{}/steps/{}", job_execution_id, step_execution_id),
        }
    }
}

/// Percent-encode one path segment. Form encoding writes spaces as `+`,
/// which a path would keep literally.
fn encode_segment(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub trait Identified {
    fn resource_id(&self) -> ResourceId;
}

impl Identified for FileInfo {
    fn resource_id(&self) -> ResourceId {
        ResourceId::File(self.path.clone())
    }
}

impl Identified for JobSummary {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Job(self.name.clone())
    }
}

impl Identified for JobDetail {
    fn resource_id(&self) -> ResourceId {
        self.summary.resource_id()
    }
}

impl Identified for JobInstanceInfo {
    fn resource_id(&self) -> ResourceId {
        ResourceId::JobInstance(self.id)
    }
}

impl Identified for JobExecutionInfo {
    fn resource_id(&self) -> ResourceId {
        ResourceId::JobExecution(self.id)
    }
}

impl Identified for StepExecutionInfo {
    fn resource_id(&self) -> ResourceId {
        ResourceId::StepExecution {
            job_execution_id: self.job_execution_id,
            step_execution_id: self.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedResource<T> {
    #[serde(flatten)]
    pub entity: T,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResources<T> {
    #[serde(flatten)]
    pub page: Page<LinkedResource<T>>,
    pub links: Vec<Link>,
}

pub fn link<T: Identified>(entity: T, base_route: &str) -> LinkedResource<T> {
    let href = format!(
        "{}/{}",
        base_route.trim_end_matches('/'),
        entity.resource_id().path()
    );
    LinkedResource {
        entity,
        links: vec![Link::self_link(href)],
    }
}

pub fn link_all<T: Identified>(entities: Vec<T>, base_route: &str) -> Vec<LinkedResource<T>> {
    entities.into_iter().map(|e| link(e, base_route)).collect()
}

/// Link a page and each of its entities. `query` holds extra filter
/// parameters that must survive into the page links.
pub fn link_page<T: Identified>(page: Page<T>, base_route: &str, query: &[(&str, &str)]) -> PagedResources<T> {
    let page_href = |number: u64| {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer
            .extend_pairs(query)
            .append_pair("page", &number.to_string())
            .append_pair("size", &page.page_size.to_string());
        format!("{}?{}", base_route, serializer.finish())
    };

    let mut links = vec![Link::self_link(page_href(page.page_number))];
    if page.has_next() {
        links.push(Link::new("next", page_href(page.page_number + 1)));
    }
    if page.has_previous() {
        links.push(Link::new("prev", page_href(page.page_number - 1)));
    }

    PagedResources {
        page: page.map(|entity| link(entity, base_route)),
        links,
    }
}
