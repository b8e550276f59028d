use std::io;

use axum::Json;
use axum::extract::{Multipart, State};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::StreamReader;

use super::extract::{PathParams, QueryParams};
use super::{ApiResult, PageParams, route};
use crate::context::AppContext;
use crate::core::links::link_page;
use crate::core::page::paginate_request;
use crate::core::{FileInfo, PagedResources};
use crate::error::Error;

const PATH_FIELD: &str = "path";
const FILE_FIELD: &str = "file";

pub(super) async fn list_files(
    State(ctx): State<AppContext>,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PagedResources<FileInfo>>> {
    let request = params.request(&ctx)?;
    let (files, total) = ctx.files.list(request.offset(), request.size()).await?;
    let page = paginate_request(request, total, files);
    Ok(Json(link_page(page, &route(&ctx, "/files"), &[])))
}

pub(super) async fn delete_files(
    State(ctx): State<AppContext>,
    PathParams(pattern): PathParams<String>,
) -> ApiResult<Json<FileInfo>> {
    let deleted = ctx.files.delete(&pattern).await?;
    Ok(Json(FileInfo::deleted(pattern, deleted)))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct UploadParams {
    path: Option<String>,
}

/// `POST /files`: the target directory comes from `?path=` or from a
/// `path` field sent before the file. Without either the file lands at the
/// staging root.
pub(super) async fn upload(
    State(ctx): State<AppContext>,
    QueryParams(params): QueryParams<UploadParams>,
    multipart: Multipart,
) -> ApiResult<Json<FileInfo>> {
    receive(&ctx, params.path, multipart).await
}

/// `POST /files/{*path}`: upload into an explicit directory.
pub(super) async fn upload_to(
    State(ctx): State<AppContext>,
    PathParams(path): PathParams<String>,
    multipart: Multipart,
) -> ApiResult<Json<FileInfo>> {
    receive(&ctx, Some(path), multipart).await
}

async fn receive(ctx: &AppContext, directory: Option<String>, mut multipart: Multipart) -> ApiResult<Json<FileInfo>> {
    let mut directory = directory;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(PATH_FIELD) if directory.is_none() => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::InvalidRequest(e.body_text()))?;
                directory = Some(text);
            }
            Some(FILE_FIELD) => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| Error::InvalidRequest("file field has no filename".to_string()))?;
                let directory = directory.unwrap_or_default();

                let reader = StreamReader::new(field.map_err(io::Error::other));
                tokio::pin!(reader);

                let file = ctx
                    .files
                    .upload_and_publish(&directory, &filename, reader)
                    .await?;
                return Ok(Json(file));
            }
            _ => continue,
        }
    }

    Err(Error::InvalidRequest(format!("multipart field '{}' is required", FILE_FIELD)).into())
}
