//! Render launch, status and cleanup handlers.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use framefan_models::{CleanupJob, RenderId, RenderRequest, RenderStatus};
use framefan_storage::operations::read_render_metadata;
use framefan_storage::{plan_cleanup, sweep};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Longest a status request may wait for the render to finish.
const MAX_STATUS_WAIT_MS: u64 = 30_000;

/// Launch response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResponse {
    pub render_id: String,
    pub chunk_count: u32,
}

/// Query parameters for the status endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    /// Wait up to this many milliseconds for the render to finish or fail.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Cleanup sweep response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub render_id: String,
    pub jobs: usize,
    pub deleted: u32,
}

/// POST /api/renders
///
/// Validates the request, persists render metadata and starts dispatch in
/// the background.
///
/// Returns:
/// - 202: Render accepted
/// - 400: Invalid chunking parameters
pub async fn launch_render(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> ApiResult<(StatusCode, Json<LaunchResponse>)> {
    let handle = match state.dispatcher.launch(&request).await {
        Ok(handle) => handle,
        Err(e) => {
            if e.is_validation() {
                metrics::record_render_rejected();
            }
            return Err(e.into());
        }
    };

    info!(
        render_id = %handle.render_id,
        chunks = handle.chunk_count,
        "Render launched"
    );

    // The render keeps running after the handle is dropped.
    Ok((
        StatusCode::ACCEPTED,
        Json(LaunchResponse {
            render_id: handle.render_id.to_string(),
            chunk_count: handle.chunk_count,
        }),
    ))
}

/// GET /api/renders/:render_id/status
///
/// Query parameters:
/// - `waitMs`: block until the render is done or failed, at most this long
///
/// Returns:
/// - 200: Render status
/// - 400: Malformed render ID
/// - 404: Unknown render
pub async fn get_render_status(
    State(state): State<AppState>,
    Path(render_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<RenderStatus>> {
    let render_id = RenderId::parse(render_id)?;

    let status = match query.wait_ms {
        Some(wait_ms) if wait_ms > 0 => {
            let timeout = Duration::from_millis(wait_ms.min(MAX_STATUS_WAIT_MS));
            let interval = state.dispatcher.config().poll_interval;
            state
                .aggregator()
                .poll_until_done(&render_id, interval, timeout)
                .await?
        }
        _ => state.aggregator().status(&render_id).await?,
    };

    if status.total_chunks == 0 && !status.done {
        return Err(ApiError::not_found(format!("Render {render_id} not found")));
    }

    Ok(Json(status))
}

/// GET /api/renders/:render_id/cleanup
///
/// Returns the deletions that remove the render's ephemeral objects.
pub async fn get_cleanup_plan(
    State(state): State<AppState>,
    Path(render_id): Path<String>,
) -> ApiResult<Json<Vec<CleanupJob>>> {
    let render_id = RenderId::parse(render_id)?;
    let metadata = read_render_metadata(state.store.as_ref(), &render_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Render {render_id} not found")))?;

    Ok(Json(plan_cleanup(&render_id, metadata.total_chunks)))
}

/// POST /api/renders/:render_id/cleanup
///
/// Executes the cleanup plan of a finished render.
///
/// Returns:
/// - 200: Sweep report
/// - 404: Unknown render
/// - 409: Render has not finished
pub async fn sweep_render(
    State(state): State<AppState>,
    Path(render_id): Path<String>,
) -> ApiResult<Json<SweepResponse>> {
    let render_id = RenderId::parse(render_id)?;
    let status = state.aggregator().status(&render_id).await?;
    if status.total_chunks == 0 && !status.done {
        return Err(ApiError::not_found(format!("Render {render_id} not found")));
    }
    if !status.done && !status.fatal_error_encountered {
        return Err(ApiError::conflict(format!(
            "Render {render_id} is still running"
        )));
    }

    let jobs = plan_cleanup(&render_id, status.total_chunks);
    let report = sweep(state.store.as_ref(), &jobs).await?;
    metrics::record_cleanup(report.deleted);
    info!(render_id = %render_id, deleted = report.deleted, "Render cleaned up");

    Ok(Json(SweepResponse {
        render_id: render_id.to_string(),
        jobs: report.jobs,
        deleted: report.deleted,
    }))
}
