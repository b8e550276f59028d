//! HTTP gateway for batchgate.
//!
//! Exposes file staging, job queries and job control as a JSON API. Every
//! route and every generated link lives under the configured base path.
//!
//! ## Endpoints
//!
//! - `/files` - list, upload and pattern-delete staged files
//! - `/configurations` - jobs known to the engine
//! - `/instances` - job instances
//! - `/executions` - executions, their steps and step progress; launch, stop, restart
//! - `/health` - liveness and a running-execution count

mod error;
mod executions;
mod extract;
mod files;
mod jobs;

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::context::AppContext;
use crate::core::PageRequest;

pub use error::{ApiError, ApiResult, ErrorBody};

/// Build the API router for `ctx`.
pub fn router(ctx: AppContext) -> Router {
    let files = Router::new()
        .route("/files", get(files::list_files).post(files::upload))
        .route("/files/{*path}", post(files::upload_to).delete(files::delete_files))
        .layer(DefaultBodyLimit::disable());

    let api = Router::new()
        .merge(files)
        .route("/configurations", get(jobs::list_jobs))
        .route("/configurations/{job_name}", get(jobs::job_detail))
        .route("/instances", get(jobs::list_instances))
        .route("/instances/{id}", get(jobs::get_instance))
        .route(
            "/executions",
            get(executions::list_executions)
                .post(executions::launch)
                .put(executions::stop_all),
        )
        .route(
            "/executions/{id}",
            get(executions::get_execution).put(executions::control_execution),
        )
        .route("/executions/{id}/steps", get(executions::list_steps))
        .route("/executions/{id}/steps/{step_id}", get(executions::get_step))
        .route(
            "/executions/{id}/steps/{step_id}/progress",
            get(executions::get_step_progress),
        )
        .route("/health", get(health));

    let base_path = ctx.config.http.base_path.trim_end_matches('/').to_string();
    let app = if base_path.is_empty() {
        api
    } else {
        Router::new().nest(&base_path, api)
    };

    app.layer(middleware::from_fn(log_request)).with_state(ctx)
}

/// Absolute route for links, e.g. `/batch/files`.
pub(crate) fn route(ctx: &AppContext, path: &str) -> String {
    format!("{}{}", ctx.config.http.base_path.trim_end_matches('/'), path)
}

/// `page`/`size` query parameters shared by every listing endpoint.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageParams {
    page: Option<i64>,
    size: Option<i64>,
}

impl PageParams {
    fn request(&self, ctx: &AppContext) -> crate::error::Result<PageRequest> {
        page_request(ctx, self.page, self.size)
    }
}

/// Page 0 and the configured page size unless the query says otherwise.
fn page_request(ctx: &AppContext, page: Option<i64>, size: Option<i64>) -> crate::error::Result<PageRequest> {
    let default_size = i64::from(ctx.config.http.default_page_size);
    PageRequest::new(page.unwrap_or(0), size.unwrap_or(default_size))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub running_executions: usize,
}

async fn health(State(ctx): State<AppContext>) -> ApiResult<Json<HealthStatus>> {
    let running = ctx.repository.running_executions().await?;
    Ok(Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: ctx.started.elapsed().as_secs(),
        running_executions: running.len(),
    }))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Handled request"
    );
    response
}

/// The HTTP server.
pub struct WebServer {
    bind_addr: SocketAddr,
    ctx: AppContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub fn new(ctx: AppContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bind_addr: ctx.config.http.bind,
            ctx,
            shutdown_tx,
        }
    }

    /// Start the server. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(
            addr = %self.bind_addr,
            base_path = %self.ctx.config.http.base_path,
            "Gateway listening"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
