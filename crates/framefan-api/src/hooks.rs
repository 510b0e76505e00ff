//! Completion hooks installed by the API server.

use async_trait::async_trait;
use framefan_coordinator::{CompletionHook, CoordinatorResult};
use framefan_models::{ErrorRecord, PostRenderData, RenderId};
use tracing::{info, warn};

/// Logs terminal render states. Stands in where no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

#[async_trait]
impl CompletionHook for LoggingHook {
    async fn on_complete(&self, data: &PostRenderData) -> CoordinatorResult<()> {
        info!(
            render_id = %data.render_id,
            output = %data.output_file,
            size = data.output_size,
            time_to_finish_ms = data.time_to_finish,
            retries = data.retries.len(),
            "Render completed"
        );
        Ok(())
    }

    async fn on_failure(
        &self,
        render_id: &RenderId,
        errors: &[ErrorRecord],
    ) -> CoordinatorResult<()> {
        let fatal = errors.iter().find(|e| e.is_fatal || e.is_render_level());
        warn!(
            render_id = %render_id,
            errors = errors.len(),
            reason = fatal.map(|e| e.message.as_str()).unwrap_or("unknown"),
            "Render failed"
        );
        Ok(())
    }

    async fn on_timeout(&self, render_id: &RenderId) -> CoordinatorResult<()> {
        warn!(render_id = %render_id, "Render timed out");
        Ok(())
    }
}
