use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use super::extract::{PathParams, QueryParams};
use super::{ApiResult, PageParams, page_request, route};
use crate::context::AppContext;
use crate::core::links::{link, link_page};
use crate::core::page::paginate_request;
use crate::core::{JobDetail, JobInstanceInfo, JobSummary, LinkedResource, PagedResources};
use crate::error::Error;

pub(super) async fn list_jobs(
    State(ctx): State<AppContext>,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PagedResources<JobSummary>>> {
    let request = params.request(&ctx)?;
    let jobs = ctx.jobs.list_jobs(request.offset(), request.size()).await?;
    let total = ctx.jobs.count_jobs().await?;
    let page = paginate_request(request, total, jobs);
    Ok(Json(link_page(page, &route(&ctx, "/configurations"), &[])))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct JobDetailParams {
    start_job_instance: Option<i64>,
    page_size: Option<i64>,
}

pub(super) async fn job_detail(
    State(ctx): State<AppContext>,
    PathParams(job_name): PathParams<String>,
    QueryParams(params): QueryParams<JobDetailParams>,
) -> ApiResult<Json<LinkedResource<JobDetail>>> {
    let start = params.start_job_instance.unwrap_or(0);
    let size = params
        .page_size
        .unwrap_or(i64::from(ctx.config.http.default_page_size));
    if start < 0 || size <= 0 {
        return Err(Error::InvalidPageRequest(format!(
            "startJobInstance must be >= 0 and pageSize > 0, got {} and {}",
            start, size
        ))
        .into());
    }

    let detail = ctx.jobs.job_detail(&job_name, start as u64, size as u64).await?;
    Ok(Json(link(detail, &route(&ctx, "/configurations"))))
}

#[derive(Debug, Deserialize)]
pub(super) struct InstanceParams {
    jobname: Option<String>,
    page: Option<i64>,
    size: Option<i64>,
}

pub(super) async fn list_instances(
    State(ctx): State<AppContext>,
    QueryParams(params): QueryParams<InstanceParams>,
) -> ApiResult<Json<PagedResources<JobInstanceInfo>>> {
    let job_name = params
        .jobname
        .ok_or_else(|| Error::InvalidRequest("query parameter 'jobname' is required".to_string()))?;
    let request = page_request(&ctx, params.page, params.size)?;

    let instances = ctx
        .jobs
        .list_instances(&job_name, request.offset(), request.size())
        .await?;
    let total = ctx.jobs.count_instances(&job_name).await?;
    let page = paginate_request(request, total, instances);
    Ok(Json(link_page(
        page,
        &route(&ctx, "/instances"),
        &[("jobname", job_name.as_str())],
    )))
}

pub(super) async fn get_instance(
    State(ctx): State<AppContext>,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<LinkedResource<JobInstanceInfo>>> {
    let instance = ctx.jobs.get_instance(id).await?;
    Ok(Json(link(instance, &route(&ctx, "/instances"))))
}
