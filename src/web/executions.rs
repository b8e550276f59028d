use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::extract::{JsonBody, PathParams, QueryParams};
use super::{ApiResult, page_request, route};
use crate::context::AppContext;
use crate::core::links::{link, link_all, link_page};
use crate::core::page::paginate_request;
use crate::core::{JobExecutionInfo, LinkedResource, StepExecutionInfo, StepExecutionProgressInfo, parse_job_parameters};
use crate::error::Error;

#[derive(Debug, Deserialize)]
pub(super) struct ExecutionParams {
    jobname: Option<String>,
    jobinstanceid: Option<i64>,
    page: Option<i64>,
    size: Option<i64>,
}

/// All executions, the executions of one job (`jobname`), or the executions
/// of one instance (`jobinstanceid`, optionally with `jobname`).
pub(super) async fn list_executions(
    State(ctx): State<AppContext>,
    QueryParams(params): QueryParams<ExecutionParams>,
) -> ApiResult<Response> {
    let base = route(&ctx, "/executions");

    if let Some(instance_id) = params.jobinstanceid {
        let executions = ctx
            .jobs
            .list_executions_for_instance(params.jobname.as_deref(), instance_id)
            .await?;
        return Ok(Json(link_all(executions, &base)).into_response());
    }

    let request = page_request(&ctx, params.page, params.size)?;
    let paged = match params.jobname {
        Some(job_name) => {
            let executions = ctx
                .jobs
                .list_executions_for_job(&job_name, request.offset(), request.size())
                .await?;
            let total = ctx.jobs.count_executions_for_job(&job_name).await?;
            link_page(
                paginate_request(request, total, executions),
                &base,
                &[("jobname", job_name.as_str())],
            )
        }
        None => {
            let executions = ctx.jobs.list_executions(request.offset(), request.size()).await?;
            let total = ctx.jobs.count_executions().await?;
            link_page(paginate_request(request, total, executions), &base, &[])
        }
    };
    Ok(Json(paged).into_response())
}

#[derive(Debug, Deserialize)]
pub(super) struct LaunchRequest {
    jobname: String,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
    /// Comma-delimited `key=value` pairs; entries in `parameters` win.
    jobparameters: Option<String>,
}

pub(super) async fn launch(
    State(ctx): State<AppContext>,
    JsonBody(request): JsonBody<LaunchRequest>,
) -> ApiResult<(StatusCode, Json<LinkedResource<JobExecutionInfo>>)> {
    let mut parameters = match request.jobparameters.as_deref() {
        Some(raw) => parse_job_parameters(raw)?,
        None => BTreeMap::new(),
    };
    parameters.extend(request.parameters);

    let execution = ctx.control.launch(&request.jobname, parameters).await?;
    Ok((
        StatusCode::CREATED,
        Json(link(execution, &route(&ctx, "/executions"))),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ControlParams {
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    restart: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StopAllResponse {
    stopped_count: usize,
}

/// `PUT /executions?stop=true`
pub(super) async fn stop_all(
    State(ctx): State<AppContext>,
    QueryParams(params): QueryParams<ControlParams>,
) -> ApiResult<Json<StopAllResponse>> {
    if !params.stop {
        return Err(Error::InvalidRequest("expected stop=true".to_string()).into());
    }
    let stopped_count = ctx.control.stop_all().await?;
    Ok(Json(StopAllResponse { stopped_count }))
}

/// `PUT /executions/{id}?stop=true` or `?restart=true`
pub(super) async fn control_execution(
    State(ctx): State<AppContext>,
    PathParams(id): PathParams<i64>,
    QueryParams(params): QueryParams<ControlParams>,
) -> ApiResult<(StatusCode, Json<LinkedResource<JobExecutionInfo>>)> {
    let (status, execution) = match (params.stop, params.restart) {
        (true, false) => (StatusCode::OK, ctx.control.stop(id).await?),
        (false, true) => (StatusCode::CREATED, ctx.control.restart(id).await?),
        _ => {
            return Err(Error::InvalidRequest("expected exactly one of stop=true or restart=true".to_string()).into());
        }
    };
    Ok((status, Json(link(execution, &route(&ctx, "/executions")))))
}

pub(super) async fn get_execution(
    State(ctx): State<AppContext>,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<LinkedResource<JobExecutionInfo>>> {
    let execution = ctx.jobs.get_execution(id).await?;
    Ok(Json(link(execution, &route(&ctx, "/executions"))))
}

pub(super) async fn list_steps(
    State(ctx): State<AppContext>,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<Vec<LinkedResource<StepExecutionInfo>>>> {
    let steps = ctx.jobs.list_step_executions(id).await?;
    Ok(Json(link_all(steps, &route(&ctx, "/executions"))))
}

pub(super) async fn get_step(
    State(ctx): State<AppContext>,
    PathParams((id, step_id)): PathParams<(i64, i64)>,
) -> ApiResult<Json<LinkedResource<StepExecutionInfo>>> {
    let step = ctx.jobs.get_step_execution(id, step_id).await?;
    Ok(Json(link(step, &route(&ctx, "/executions"))))
}

pub(super) async fn get_step_progress(
    State(ctx): State<AppContext>,
    PathParams((id, step_id)): PathParams<(i64, i64)>,
) -> ApiResult<Json<StepExecutionProgressInfo>> {
    let progress = ctx.jobs.get_step_progress(id, step_id).await?;
    Ok(Json(progress))
}
