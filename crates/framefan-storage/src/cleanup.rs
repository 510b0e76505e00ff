//! Cleanup planning and sweeping.

use framefan_models::{CleanupJob, CleanupKind, RenderId};
use tracing::{debug, info};

use crate::error::StorageResult;
use crate::keys::{chunk_timings_prefix, marker_prefix, ObjectKey};
use crate::store::ObjectStore;

/// Enumerate the deletions that remove every ephemeral key of a render.
///
/// One prefix job for all initialization markers, one exact job per chunk
/// payload, one prefix job per chunk's timing records and one exact job for
/// encoding progress.
pub fn plan_cleanup(render_id: &RenderId, chunk_count: u32) -> Vec<CleanupJob> {
    let mut jobs = Vec::with_capacity(2 + 2 * chunk_count as usize);
    jobs.push(CleanupJob::prefix(marker_prefix(render_id)));
    for chunk in 0..chunk_count {
        jobs.push(CleanupJob::exact(
            ObjectKey::ChunkPayload {
                render_id: render_id.clone(),
                chunk,
            }
            .encode(),
        ));
    }
    for chunk in 0..chunk_count {
        jobs.push(CleanupJob::prefix(chunk_timings_prefix(render_id, chunk)));
    }
    jobs.push(CleanupJob::exact(
        ObjectKey::EncodingProgress {
            render_id: render_id.clone(),
        }
        .encode(),
    ));
    jobs
}

/// Outcome of executing a cleanup plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs: usize,
    pub deleted: u32,
}

/// Execute a cleanup plan. Prefix jobs list then batch-delete.
pub async fn sweep(store: &dyn ObjectStore, jobs: &[CleanupJob]) -> StorageResult<SweepReport> {
    let mut report = SweepReport {
        jobs: jobs.len(),
        deleted: 0,
    };

    for job in jobs {
        match job.kind {
            CleanupKind::Exact => {
                if store.exists(&job.name).await? {
                    store.delete(&job.name).await?;
                    report.deleted += 1;
                }
            }
            CleanupKind::Prefix => {
                let keys: Vec<String> = store
                    .list(&job.name)
                    .await?
                    .into_iter()
                    .map(|o| o.key)
                    .collect();
                debug!(prefix = %job.name, count = keys.len(), "Sweeping prefix");
                report.deleted += store.delete_objects(&keys).await?;
            }
        }
    }

    info!(jobs = report.jobs, deleted = report.deleted, "Cleanup sweep finished");
    Ok(report)
}
